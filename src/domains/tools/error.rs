//! Tool-specific error types.
//!
//! [`ConfigError`] covers everything that must stop the server at startup.
//! [`ToolError`] covers per-call failures; the dispatcher turns each of them
//! into an error envelope and keeps serving.

use thiserror::Error;

use super::schema::{SchemaError, ValidationError};

/// Errors that can occur while a single tool call is dispatched.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// The call arguments did not match the tool's input schema.
    #[error("Invalid input: {0}")]
    InvalidInput(ValidationError),

    /// A dependency declared in `requires` is not installed.
    #[error("Tool '{tool}' requires '{dependency}', which is not available")]
    DependencyUnavailable { tool: String, dependency: String },

    /// The tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The envelope produced by the tool did not match its output schema.
    #[error("Invalid output: {0}")]
    InvalidOutput(ValidationError),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a new "not found" error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a new "dependency unavailable" error.
    pub fn dependency_unavailable(tool: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            tool: tool.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a new "execution failed" error.
    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a new "internal" error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable kind written to the envelope's `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::ExecutionFailed(_) => "execution_error",
            Self::InvalidOutput(_) => "invalid_output",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Field-level detail, for validation failures only.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::InvalidInput(e) | Self::InvalidOutput(e) => Some(e),
            _ => None,
        }
    }
}

/// Startup-fatal configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A descriptor was declared without a name.
    #[error("Tool name cannot be empty")]
    EmptyName,

    /// A descriptor name carries leading or trailing whitespace.
    #[error("Tool name '{0}' has surrounding whitespace")]
    UntrimmedName(String),

    /// A descriptor was declared without a description.
    #[error("Tool '{0}': description cannot be empty")]
    EmptyDescription(String),

    /// A descriptor was declared with an empty version string.
    #[error("Tool '{0}': version cannot be empty")]
    EmptyVersion(String),

    /// The category is not part of the closed enumeration.
    #[error("Unknown tool category '{0}'")]
    UnknownCategory(String),

    /// The status is not part of the closed enumeration.
    #[error("Unknown tool status '{0}'")]
    UnknownStatus(String),

    /// No implementation is known under the given function name.
    #[error("Tool '{tool}': no implementation named '{function}'")]
    UnresolvedImplementation { tool: String, function: String },

    /// The descriptor is missing one of its parts.
    #[error("Tool '{tool}': missing {part}")]
    MissingPart { tool: String, part: &'static str },

    /// A parameter or output struct has a schema that cannot be compiled.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Built-in reference data failed its own validation rules.
    #[error("Invalid reference data: {0}")]
    Dataset(ValidationError),

    /// A tool with this name is already registered.
    #[error("Tool '{0}' is already registered")]
    DuplicateName(String),

    /// The declarative tool source could not be read.
    #[error("Failed to read tool definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The declarative tool source is not valid YAML of the expected shape.
    #[error("Malformed tool definitions: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// One or more entries of the declarative source were rejected.
    #[error("{} invalid tool definition(s): {}", .0.len(), describe_entries(.0))]
    Catalog(Vec<EntryError>),
}

/// A rejected entry of the declarative tool source.
#[derive(Debug, Error)]
#[error("entry #{index} ({name}): {error}")]
pub struct EntryError {
    /// Zero-based position in the source.
    pub index: usize,
    /// Declared name, or `<unnamed>`.
    pub name: String,
    pub error: ConfigError,
}

fn describe_entries(entries: &[EntryError]) -> String {
    entries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigError {
    pub fn missing(tool: impl Into<String>, part: &'static str) -> Self {
        Self::MissingPart {
            tool: tool.into(),
            part,
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
