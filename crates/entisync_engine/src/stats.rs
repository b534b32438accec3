//! Coordinator statistics.

use serde::Serialize;

/// Counters describing what a coordinator has done.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Requests handed to the transport.
    pub remote_calls: u64,
    /// Operations completed without a remote call (client mode).
    pub local_completions: u64,
    /// Infinite-mode reads answered from the already fetched state.
    pub cache_hits: u64,
    /// Transport calls that returned an error.
    pub failures: u64,
    /// Dirty fields cleared by reconciliation.
    pub fields_reconciled: u64,
    /// Dirty fields kept because they changed while a request was in flight.
    pub fields_left_dirty: u64,
}
