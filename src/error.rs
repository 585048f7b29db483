//! Error types for Exocortex

use thiserror::Error;

/// Result type alias for Exocortex operations
pub type Result<T> = std::result::Result<T, ExocortexError>;

/// Main error type for Exocortex
#[derive(Error, Debug)]
pub enum ExocortexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Embedding oracle unavailable: {0}")]
    Oracle(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExocortexError {
    /// Check if error is retryable (transient storage faults)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExocortexError::Storage(_) | ExocortexError::Io(_) | ExocortexError::Database(_)
        )
    }

    /// Get error code for the MCP protocol
    pub fn code(&self) -> i64 {
        match self {
            ExocortexError::NotFound(_) => -32001,
            ExocortexError::InvalidInput(_) => -32602,
            ExocortexError::PreconditionFailed(_) => -32002,
            ExocortexError::LimitExceeded(_) => -32004,
            ExocortexError::Conflict(_) => -32005,
            _ => -32000,
        }
    }
}
