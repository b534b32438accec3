//! Error types for the sync engine.

use crate::mode::{Method, Mode};
use entisync_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Transport errors reach the caller exactly as the transport produced
/// them; the coordinator never retries or rewrites them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Server rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// The server has no record for the request.
    #[error("{collection} record not found on server")]
    NotFound {
        /// Collection name.
        collection: String,
    },

    /// Local entity error.
    #[error("entity error: {0}")]
    Core(#[from] CoreError),

    /// The mode is not valid for the method.
    #[error("mode {mode} is not supported for {method}")]
    UnsupportedMode {
        /// Requested method.
        method: Method,
        /// Requested mode.
        mode: Mode,
    },

    /// Protocol error (malformed response).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Retrying is always safe with respect to local state: failed
    /// operations reconcile nothing.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}
