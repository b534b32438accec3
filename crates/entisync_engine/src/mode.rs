//! Sync methods and reconciliation modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Abstract remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Create a record the server has never seen.
    Create,
    /// Replace a record with the full local state (or its dirty subset).
    Update,
    /// Partially update a record.
    Patch,
    /// Delete a record.
    Delete,
    /// Read a record.
    Read,
}

impl Method {
    /// Returns true for methods that carry a `changes` payload.
    pub fn is_write(&self) -> bool {
        matches!(self, Method::Create | Method::Update | Method::Patch)
    }

    /// Returns true if `mode` may be used with this method.
    ///
    /// `Infinite` is a read-only mode.
    pub fn supports(&self, mode: Mode) -> bool {
        mode != Mode::Infinite || *self == Method::Read
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Create => "create",
            Method::Update => "update",
            Method::Patch => "patch",
            Method::Delete => "delete",
            Method::Read => "read",
        };
        f.write_str(name)
    }
}

/// How an operation treats the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// No remote call; completes locally with an empty result.
    Client,
    /// Remote call with reconciliation on success.
    #[default]
    Server,
    /// Reads only: remote call unless the entity was already fetched.
    Infinite,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Client => "client",
            Mode::Server => "server",
            Mode::Infinite => "infinite",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_server() {
        assert_eq!(Mode::default(), Mode::Server);
    }

    #[test]
    fn infinite_is_read_only() {
        assert!(Method::Read.supports(Mode::Infinite));
        for method in [Method::Create, Method::Update, Method::Patch, Method::Delete] {
            assert!(!method.supports(Mode::Infinite));
            assert!(method.supports(Mode::Client));
            assert!(method.supports(Mode::Server));
        }
    }

    #[test]
    fn write_methods() {
        assert!(Method::Create.is_write());
        assert!(Method::Patch.is_write());
        assert!(!Method::Delete.is_write());
        assert!(!Method::Read.is_write());
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&Mode::Infinite).unwrap(), r#""infinite""#);
        let method: Method = serde_json::from_str(r#""patch""#).unwrap();
        assert_eq!(method, Method::Patch);
    }
}
