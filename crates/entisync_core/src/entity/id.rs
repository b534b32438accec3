//! Client-side entity identifier.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Locally generated identifier for an entity.
///
/// Client IDs are:
/// - Assigned at construction, before any server round-trip
/// - Unique within a registry
/// - Immutable once assigned
///
/// They are stored in the entity's attributes (as text) under the model's
/// client-id field, so they travel with every create payload.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a new random client ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier string.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a client ID from an attribute value.
    ///
    /// Returns `None` unless the value is non-empty text.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_text() {
            Some(s) if !s.is_empty() => Some(Self(s.to_string())),
            _ => None,
        }
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts to an attribute value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Text(self.0.clone())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for ClientId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<ClientId> for Value {
    fn from(id: ClientId) -> Self {
        Value::Text(id.0)
    }
}
