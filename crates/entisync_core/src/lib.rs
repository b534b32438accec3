//! # entisync core
//!
//! Local entity replicas with change tracking.
//!
//! This crate provides:
//! - Dynamic attribute values and observable attribute storage
//! - [`Entity`]: a record with a client id, an optional server id and a
//!   dirty set of locally changed attributes
//! - [`Registry`]: per-type identity map that deduplicates entities by
//!   client id or server id
//! - [`RegistryProvider`]: typed access to one registry per model type
//!
//! Network synchronization lives in `entisync_engine`; this crate never
//! performs I/O.
//!
//! ## Usage
//!
//! ```
//! use entisync_core::{attributes, Model, Registry, SetMode, Value};
//!
//! struct Note;
//!
//! impl Model for Note {
//!     const NAME: &'static str = "notes";
//! }
//!
//! let notes = Registry::<Note>::new();
//! let note = notes.create(attributes([("title", "A")])).unwrap();
//!
//! note.set_one("title", "B", SetMode::Client).unwrap();
//! assert_eq!(note.dirtied_attributes(), attributes([("title", "B")]));
//!
//! note.set_one("body", "from server", SetMode::Server).unwrap();
//! assert!(!note.has_dirtied("body"));
//! assert_eq!(note.get("body"), Some(Value::from("from server")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attributes;
mod entity;
mod error;
mod model;
mod registry;
mod value;

pub use attributes::{AttributeChange, AttributeObserver, AttributeStore, SetMode};
pub use entity::{ClientId, Entity, EntitySnapshot, Reconciliation};
pub use error::{CoreError, CoreResult};
pub use model::Model;
pub use registry::{Registry, RegistryProvider};
pub use value::{attributes, Attributes, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
