//! Error types for the form engine

use listform_client::TransportError;
use thiserror::Error;

use crate::validation::Violation;

/// Result type for form operations
pub type Result<T> = std::result::Result<T, FormError>;

/// Schema compilation errors. Fatal to bootstrap.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// List metadata could not be fetched
    #[error("List metadata unreachable: {0}")]
    Unreachable(String),

    /// List metadata is structurally invalid
    #[error("Malformed list metadata: {0}")]
    Malformed(String),

    /// Two columns derive the same model key
    #[error("Columns '{first}' and '{second}' both map to key '{key}'")]
    KeyCollision {
        key: String,
        first: String,
        second: String,
    },
}

/// A single raw value that could not be decoded. Recovered locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Cannot read {raw:?} as {field_type}")]
    Invalid { field_type: String, raw: String },

    #[error("Unexpected {shape} for {field_type}")]
    UnexpectedShape { field_type: String, shape: String },
}

/// Form error types
#[derive(Error, Debug)]
pub enum FormError {
    /// Schema error
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Submit blocked by validation
    #[error("Validation failed: {}", summarize(.0))]
    Validation(Vec<Violation>),

    /// A pre-save hook declined the save
    #[error("Save cancelled: {0}")]
    Vetoed(String),

    /// Operation requires a bootstrapped form
    #[error("Form is not initialized")]
    NotInitialized,

    /// Operation requires a saved item
    #[error("Form has no saved item")]
    NoItem,

    /// Operation disabled by configuration or list settings
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Field key is not part of the schema
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Attachment rejected before upload
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// A pipeline halted
    #[error("Pipeline halted: {0}")]
    Pipeline(String),

    /// UI-binding runtime error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.label.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl FormError {
    /// Violations when this is a validation failure.
    pub fn violations(&self) -> &[Violation] {
        match self {
            FormError::Validation(v) => v,
            _ => &[],
        }
    }
}
