//! Configuration for the sync coordinator.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Serialize writes per entity.
    ///
    /// When set, every write, delete and push holds a per-entity async
    /// lock across its transport call, so at most one write per entity is
    /// in flight and reconciliations apply in issue order. When cleared,
    /// overlapping writes each reconcile independently and may land out of
    /// order.
    pub serialize_writes: bool,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            serialize_writes: true,
        }
    }

    /// Sets per-entity write serialization.
    pub fn with_serialize_writes(mut self, serialize: bool) -> Self {
        self.serialize_writes = serialize;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert!(config.serialize_writes);
    }

    #[test]
    fn config_builder() {
        let config = EngineConfig::new().with_serialize_writes(false);
        assert!(!config.serialize_writes);
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());

        let config: EngineConfig =
            serde_json::from_str(r#"{"serialize_writes": false}"#).unwrap();
        assert!(!config.serialize_writes);
    }
}
