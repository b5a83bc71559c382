//! Error types for the Conveyor CLI
//!
//! This module provides user-friendly error types with clear, actionable messages
//! that help users understand what went wrong and how to fix it.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Comprehensive error type for CLI operations
///
/// All errors are designed to be user-facing with clear messages and suggestions.
#[derive(Error, Debug)]
pub enum CliError {
    /// Required file is missing
    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    /// Flow definition file has invalid format or content
    #[error("Invalid flow definition: {0}. Check the [[stage]] entries in your definition file.")]
    InvalidDefinition(String),

    /// Stage code does not appear in the definition file
    #[error("Unknown stage: '{0}'. Run 'conveyor check' to list the stages in your definition.")]
    UnknownStage(String),

    /// Flow store operation failed
    #[error("Flow error: {0}")]
    Flow(#[from] conveyor_common::FlowError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed
    #[error("Failed to parse TOML: {0}. Check the file syntax at the indicated line/column.")]
    TomlParse(#[from] toml::de::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an invalid definition error
    pub fn invalid_definition(msg: impl Into<String>) -> Self {
        Self::InvalidDefinition(msg.into())
    }

    /// Create an unknown stage error
    pub fn unknown_stage(code: impl Into<String>) -> Self {
        Self::UnknownStage(code.into())
    }
}
