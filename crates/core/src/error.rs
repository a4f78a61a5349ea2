//! Error types for shadow operations

/// Error type for property reads, writes and cache operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShadowError {
    /// The class (or any of its bases) declares no property with this name
    #[error("No such property: {0}")]
    NoSuchProperty(String),

    /// The property exists but was not declared writable
    #[error("Property is not writable: {0}")]
    NotWritable(String),

    /// The supplied value does not match the property's declared type
    #[error("Type mismatch writing {property}: expected {expected}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
    },

    /// The shadow does not cover this class yet
    #[error("Shadow is not expanded to class: {0}")]
    IncompleteShadow(&'static str),

    /// The underlying object has been destroyed
    #[error("Underlying object is gone")]
    ObjectGone,
}
