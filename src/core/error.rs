//! Error types and handling for the MCP server.
//!
//! This module defines a unified error type that can represent errors from
//! the tools domain, startup configuration and external dependencies.

use thiserror::Error;

use crate::domains::tools::{ConfigError, ToolError};

/// A specialized Result type for MCP server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the MCP server.
#[derive(Debug, Error)]
pub enum Error {
    /// Error originating from a tool call.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The tool catalog could not be built.
    #[error("Catalog error: {0}")]
    Catalog(#[from] ConfigError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from file operations or network communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal server errors that should not occur under normal operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_converts() {
        let err: Error = ConfigError::DuplicateName("search_mofs".into()).into();
        assert!(matches!(err, Error::Catalog(_)));
        assert!(err.to_string().contains("search_mofs"));
    }

    #[test]
    fn test_tool_error_converts() {
        let err: Error = ToolError::not_found("x").into();
        assert_eq!(err.to_string(), "Tool error: Tool not found: x");
    }
}
