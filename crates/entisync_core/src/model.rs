//! Entity type descriptors.

use crate::value::Attributes;

/// Describes one entity type: its collection name, identity field
/// conventions and the hooks applied to its attributes.
///
/// Each implementing type gets its own [`Registry`](crate::Registry),
/// retrieved through a [`RegistryProvider`](crate::RegistryProvider).
///
/// ```
/// use entisync_core::{Attributes, Model};
///
/// struct Note;
///
/// impl Model for Note {
///     const NAME: &'static str = "notes";
///
///     fn validate(attributes: &Attributes) -> Result<(), String> {
///         match attributes.get("title").and_then(|v| v.as_text()) {
///             Some("") => Err("title must not be empty".into()),
///             _ => Ok(()),
///         }
///     }
/// }
/// ```
pub trait Model: Send + Sync + 'static {
    /// Collection name, passed to the transport with every request.
    const NAME: &'static str;

    /// Attribute holding the server-assigned identifier.
    const ID_FIELD: &'static str = "id";

    /// Attribute holding the locally generated client identifier.
    const CLIENT_ID_FIELD: &'static str = "client_id";

    /// Default attributes, merged underneath constructor attributes.
    fn defaults() -> Attributes {
        Attributes::new()
    }

    /// Parse step applied to attributes before construction.
    fn parse(attributes: Attributes) -> Attributes {
        attributes
    }

    /// Validation hook, run against the candidate state of every local write.
    fn validate(_attributes: &Attributes) -> Result<(), String> {
        Ok(())
    }

    /// Returns true if `key` is one of the identity fields.
    fn is_identity_field(key: &str) -> bool {
        key == Self::ID_FIELD || key == Self::CLIENT_ID_FIELD
    }
}
