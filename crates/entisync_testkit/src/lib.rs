//! # entisync testkit
//!
//! Test utilities for entisync.
//!
//! This crate provides:
//! - [`MemoryRemote`]: an in-memory server implementing `SyncTransport`,
//!   with failure injection and a gate for holding requests in flight
//! - Sample models and coordinator wiring
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entisync_testkit::prelude::*;
//!
//! let (remote, sync) = coordinator_with_remote(EngineConfig::default());
//! let notes = Registry::<Note>::new();
//! let note = notes.create(note_attributes("Draft")).unwrap();
//! sync.push(&note).await.unwrap();
//! assert_eq!(remote.records("notes").len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
    pub use entisync_core::{attributes, Attributes, Model, Registry, SetMode, Value};
    pub use entisync_engine::{Coordinator, EngineConfig, Method, Mode, SyncError};
}

pub use fixtures::*;
pub use generators::*;
pub use remote::MemoryRemote;
