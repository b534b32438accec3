//! Test fixtures: sample models and wiring helpers.

use crate::remote::MemoryRemote;
use entisync_core::{attributes, Attributes, Model, Value};
use entisync_engine::{Coordinator, EngineConfig};
use std::sync::Arc;

/// A note with a required, non-empty title.
#[derive(Debug)]
pub struct Note;

impl Model for Note {
    const NAME: &'static str = "notes";

    fn defaults() -> Attributes {
        attributes([("archived", false)])
    }

    fn validate(attributes: &Attributes) -> Result<(), String> {
        match attributes.get("title").and_then(Value::as_text) {
            Some("") => Err("title must not be empty".into()),
            _ => Ok(()),
        }
    }
}

/// A task keyed by a custom id field.
#[derive(Debug)]
pub struct Task;

impl Model for Task {
    const NAME: &'static str = "tasks";
    const ID_FIELD: &'static str = "task_id";
    const CLIENT_ID_FIELD: &'static str = "local_id";

    fn parse(mut attributes: Attributes) -> Attributes {
        // Older payloads carry `name` instead of `title`.
        if let Some(name) = attributes.remove("name") {
            attributes.entry("title".to_string()).or_insert(name);
        }
        attributes
    }
}

/// A coordinator wired to a fresh [`MemoryRemote`].
///
/// The remote is shared so tests can inspect it and control its gate.
pub fn coordinator_with_remote(
    config: EngineConfig,
) -> (Arc<MemoryRemote>, Coordinator<MemoryRemote>) {
    let remote = Arc::new(MemoryRemote::new());
    let coordinator = Coordinator::with_shared_transport(config, Arc::clone(&remote));
    (remote, coordinator)
}

/// Attributes for a note with the given title.
pub fn note_attributes(title: &str) -> Attributes {
    attributes([("title", title)])
}
