//! Declarative tool catalog.
//!
//! Tool definitions are plain data (YAML). They are compiled once, at
//! startup, against an [`ImplementationTable`] into an immutable
//! [`ToolRegistry`]. Nothing on the dispatch path parses or reads files.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::descriptor::{ToolCategory, ToolDescriptor, ToolStatus};
use super::error::{ConfigError, EntryError};
use super::handlers::ImplementationTable;
use super::registry::ToolRegistry;

/// Catalog shipped with the server.
const BUILTIN_DEFINITIONS: &str = include_str!("../../../tool_definitions.yaml");

/// One entry of the declarative source.
///
/// Category and status stay strings here so that a bad value is reported
/// against its entry instead of failing the whole document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub function_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub requires: Vec<String>,
}

/// The whole declarative source.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolDefinitions {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// Parse definitions from YAML text.
pub fn parse_definitions(yaml: &str) -> Result<ToolDefinitions, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Definitions embedded in the binary.
pub fn builtin_definitions() -> Result<ToolDefinitions, ConfigError> {
    parse_definitions(BUILTIN_DEFINITIONS)
}

/// Read definitions from a YAML file.
pub fn load_definitions(path: impl AsRef<Path>) -> Result<ToolDefinitions, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
    let definitions = parse_definitions(&content)?;
    info!(
        "Loaded {} tool definition(s) from {}",
        definitions.tools.len(),
        path.display()
    );
    Ok(definitions)
}

fn compile_entry(
    definition: &ToolDefinition,
    implementations: &ImplementationTable,
) -> Result<ToolDescriptor, ConfigError> {
    let category: ToolCategory = definition.category.parse()?;
    let status = match &definition.status {
        Some(status) => status.parse::<ToolStatus>()?,
        None => ToolStatus::default(),
    };
    let binding = implementations
        .resolve(definition.function_name.trim())
        .ok_or_else(|| ConfigError::UnresolvedImplementation {
            tool: definition.name.clone(),
            function: definition.function_name.clone(),
        })?;

    let mut builder = ToolDescriptor::builder(&definition.name)
        .description(&definition.description)
        .category(category)
        .tags(&definition.tags)
        .requires(binding.requires.iter().chain(&definition.requires))
        .status(status)
        .implementation(binding.implementation.clone())
        .input_schema(binding.input_schema.clone())
        .output_schema(binding.output_schema.clone());
    if let Some(version) = &definition.version {
        builder = builder.version(version);
    }
    builder.build()
}

/// Compile definitions into a registry.
///
/// Every rejected entry is reported in a single [`ConfigError::Catalog`];
/// no partial registry is ever returned.
pub fn compile_catalog(
    definitions: &ToolDefinitions,
    implementations: &ImplementationTable,
) -> Result<ToolRegistry, ConfigError> {
    let mut registry = ToolRegistry::new();
    let mut rejected = Vec::new();

    for (index, definition) in definitions.tools.iter().enumerate() {
        let outcome = compile_entry(definition, implementations)
            .and_then(|descriptor| registry.register(descriptor));
        if let Err(error) = outcome {
            let name = if definition.name.trim().is_empty() {
                "<unnamed>".to_string()
            } else {
                definition.name.clone()
            };
            debug!("Rejected tool definition #{} ({}): {}", index, name, error);
            rejected.push(EntryError { index, name, error });
        }
    }

    if rejected.is_empty() {
        Ok(registry)
    } else {
        Err(ConfigError::Catalog(rejected))
    }
}
