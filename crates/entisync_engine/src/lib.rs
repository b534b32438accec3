//! # entisync engine
//!
//! Synchronization between local entity replicas and a remote store.
//!
//! This crate provides:
//! - [`Coordinator`]: runs create/update/patch/delete/read through a
//!   [`SyncTransport`] in `client`, `server` or `infinite` mode and
//!   reconciles the result into the entity and its registry
//! - Push/pull orchestration: [`Coordinator::push`] expresses an entity's
//!   pending intent as a single operation, [`Coordinator::pull`] fetches
//!   once and then serves from the local replica
//! - [`MockTransport`] for tests
//!
//! ## Reconciliation rule
//!
//! After a successful write, a dirty attribute is cleared only if its
//! current dirty value equals the value that was sent. A local write that
//! lands while the request is in flight stays dirty and is pushed next
//! time. Failed operations reconcile nothing, so `push` and `pull` are
//! always safe to retry.
//!
//! ## Usage
//!
//! ```
//! use entisync_core::{attributes, Model, Registry, SetMode};
//! use entisync_engine::{Coordinator, EngineConfig, MockTransport, PushAction};
//!
//! struct Note;
//!
//! impl Model for Note {
//!     const NAME: &'static str = "notes";
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let sync = Coordinator::new(EngineConfig::default(), MockTransport::new());
//! let notes = Registry::<Note>::new();
//!
//! let note = notes.create(attributes([("title", "A")])).unwrap();
//! assert_eq!(sync.push(&note).await.unwrap(), PushAction::Create);
//! assert!(!note.is_dirty());
//!
//! note.set_one("title", "B", SetMode::Client).unwrap();
//! assert_eq!(sync.push(&note).await.unwrap(), PushAction::Update);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod mode;
mod orchestrator;
mod stats;
mod transport;

pub use config::EngineConfig;
pub use coordinator::{Coordinator, DestroyOptions, DestroyOutcome, FetchOptions, SaveOptions};
pub use error::{SyncError, SyncResult};
pub use mode::{Method, Mode};
pub use orchestrator::{plan_push, PushAction, PushReport};
pub use stats::SyncStats;
pub use transport::{MockTransport, SyncRequest, SyncResponse, SyncTransport};
