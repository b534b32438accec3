//! Observable attribute storage.
//!
//! [`AttributeStore`] is the plain get/set-with-change-notification layer an
//! [`Entity`](crate::Entity) is built on. It knows nothing about dirt or
//! identity; the entity decorates it with both.

use crate::entity::ClientId;
use crate::value::{Attributes, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Origin of an attribute write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetMode {
    /// Local mutation; changed keys are recorded as dirt.
    #[default]
    Client,
    /// Authoritative value from reconciliation; never recorded as dirt.
    Server,
}

impl fmt::Display for SetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetMode::Client => f.write_str("client"),
            SetMode::Server => f.write_str("server"),
        }
    }
}

/// A single attribute change produced by a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    /// Attribute name.
    pub key: String,
    /// Value before the write, if the attribute existed.
    pub previous: Option<Value>,
    /// Value after the write.
    pub current: Value,
}

/// Receives change notifications from an entity's attribute store.
pub trait AttributeObserver: Send + Sync {
    /// Called after a write that changed at least one attribute.
    fn attributes_changed(&self, client_id: &ClientId, changes: &[AttributeChange], mode: SetMode);
}

impl<F> AttributeObserver for F
where
    F: Fn(&ClientId, &[AttributeChange], SetMode) + Send + Sync,
{
    fn attributes_changed(&self, client_id: &ClientId, changes: &[AttributeChange], mode: SetMode) {
        self(client_id, changes, mode)
    }
}

/// In-memory attribute storage with change observers.
#[derive(Default)]
pub struct AttributeStore {
    values: Attributes,
    observers: Vec<Arc<dyn AttributeObserver>>,
}

impl AttributeStore {
    /// Creates a store holding `values`.
    pub fn new(values: Attributes) -> Self {
        Self {
            values,
            observers: Vec::new(),
        }
    }

    /// Gets an attribute value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if the attribute is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Borrows all values.
    pub fn values(&self) -> &Attributes {
        &self.values
    }

    /// Returns a copy of all values.
    pub fn snapshot(&self) -> Attributes {
        self.values.clone()
    }

    /// Returns the candidate state `changes` would produce, without applying it.
    pub fn preview(&self, changes: &Attributes) -> Attributes {
        let mut candidate = self.values.clone();
        candidate.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        candidate
    }

    /// Merges `changes` into the store.
    ///
    /// Only keys whose value actually differs are written and reported.
    pub fn merge(&mut self, changes: Attributes) -> Vec<AttributeChange> {
        let mut applied = Vec::new();
        for (key, current) in changes {
            if self.values.get(&key) == Some(&current) {
                continue;
            }
            let previous = self.values.insert(key.clone(), current.clone());
            applied.push(AttributeChange {
                key,
                previous,
                current,
            });
        }
        applied
    }

    /// Registers an observer.
    pub fn observe(&mut self, observer: Arc<dyn AttributeObserver>) {
        self.observers.push(observer);
    }

    /// Returns the registered observers.
    ///
    /// Callers clone the list so notification happens without holding the
    /// lock that guards the store.
    pub fn observers(&self) -> Vec<Arc<dyn AttributeObserver>> {
        self.observers.clone()
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore")
            .field("values", &self.values)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::attributes;

    #[test]
    fn merge_reports_only_changed_keys() {
        let mut store = AttributeStore::new(attributes([("a", 1i64), ("b", 2)]));
        let changes = store.merge(attributes([("a", 1i64), ("b", 3), ("c", 4)]));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].key, "b");
        assert_eq!(changes[0].previous, Some(Value::Integer(2)));
        assert_eq!(changes[0].current, Value::Integer(3));
        assert_eq!(changes[1].key, "c");
        assert_eq!(changes[1].previous, None);
        assert_eq!(store.get("b"), Some(&Value::Integer(3)));
    }

    #[test]
    fn preview_does_not_apply() {
        let store = AttributeStore::new(attributes([("a", 1i64)]));
        let candidate = store.preview(&attributes([("a", 2i64)]));
        assert_eq!(candidate.get("a"), Some(&Value::Integer(2)));
        assert_eq!(store.get("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn set_mode_default_is_client() {
        assert_eq!(SetMode::default(), SetMode::Client);
        assert_eq!(SetMode::Server.to_string(), "server");
    }
}
