use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid GUID string: {0}")]
    InvalidGuid(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    #[error("unsupported property value: {0}")]
    UnsupportedValue(String),
}
