//! Error types for the memory engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the memory engine.
///
/// Variants map 1:1 onto the error kinds adapters (MCP, HTTP) are expected
/// to translate into protocol-appropriate status codes.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error("Transient backend error: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "llm")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Stable machine-readable tag, matching spec's error kind names.
    pub fn tag(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "InvalidInput",
            EngineError::NotFound(_) => "NotFound",
            EngineError::Conflict(_) => "Conflict",
            EngineError::Misconfigured(_) => "Misconfigured",
            EngineError::Transient(_) => "Transient",
            EngineError::Internal(_) => "Internal",
            EngineError::Serialization(_) => "Internal",
            #[cfg(feature = "llm")]
            EngineError::Http(_) => "Transient",
        }
    }

    /// Whether a caller may retry the operation as-is (backend hiccups)
    /// versus needing to change the request (invalid input, not found).
    pub fn is_retryable(&self) -> bool {
        matches!(self.tag(), "Transient")
    }

    /// MCP-style JSON-RPC error code, kept stable across releases.
    pub fn code(&self) -> i64 {
        match self.tag() {
            "NotFound" => -32001,
            "InvalidInput" => -32602,
            "Conflict" => -32005,
            "Misconfigured" => -32002,
            "Transient" => -32003,
            _ => -32000,
        }
    }
}
