//! Error types for the list service client

use thiserror::Error;

/// List service transport error
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// List, item or person not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A write batch was accepted by the transport but rejected by the list
    #[error("Batch rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Client could not be configured
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TransportError {
    /// True when the server reported a concurrency conflict on the item version.
    pub fn is_conflict(&self) -> bool {
        match self {
            TransportError::Server { status, .. } => *status == 409 || *status == 412,
            TransportError::Rejected { code, .. } => code.eq_ignore_ascii_case("0x81020015"),
            _ => false,
        }
    }
}

/// Result type for list service operations
pub type Result<T> = std::result::Result<T, TransportError>;
