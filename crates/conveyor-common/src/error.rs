//! Error types for Conveyor

use thiserror::Error;

/// Result type alias for Conveyor operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for Conveyor
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("Invalid flow code: {0}")]
    InvalidCode(String),

    #[error("Invalid flow entity: {0}")]
    InvalidEntity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
