//! Unified error types for Strand

use thiserror::Error;

/// Unified error type for all Strand operations
#[derive(Error, Debug)]
pub enum StrandError {
    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unauthorized (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // Event stream errors
    #[error("Event stream connection failed: {0}")]
    StreamConnect(String),

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("Malformed sync update: {0}")]
    MalformedUpdate(String),

    // Connection flow errors
    #[error("Source '{0}' requires configuration before it can be connected")]
    ConfigurationRequired(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Connection flow error: {0}")]
    Flow(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl StrandError {
    /// Whether this error came from a 401/403 response
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Whether a fresh attempt could reasonably succeed.
    ///
    /// Auth failures count: the token cache has been cleared, so the next
    /// attempt fetches a fresh token.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unauthorized { .. } | Self::Transport(_) | Self::Stream(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::StreamConnect(_) => true,
            _ => false,
        }
    }
}

/// Result type alias using StrandError
pub type Result<T> = std::result::Result<T, StrandError>;
