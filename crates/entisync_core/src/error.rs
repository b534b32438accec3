//! Error types for entisync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while mutating entities or registries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An identity field was written with a value different from the one held.
    #[error("field `{field}` is immutable once assigned")]
    ImmutableField {
        /// Name of the identity field.
        field: String,
    },

    /// The model's validation hook rejected the candidate attributes.
    #[error("validation failed for {model}: {message}")]
    Validation {
        /// Model name.
        model: &'static str,
        /// Message produced by the validation hook.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an immutable field error.
    pub fn immutable_field(field: impl Into<String>) -> Self {
        Self::ImmutableField {
            field: field.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
