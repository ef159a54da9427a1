//! Structure parsing tool.
//!
//! Reads a CIF, XYZ or POSCAR structure, given either as file content or as
//! a path to a file, and reports its size, Hill-order formula and the
//! `atoms_dict` the calculation tools take as input.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};
use validator::Validate;

use super::structure::{AtomsDict, Structure, load_structure_source, parse_structure};
use crate::domains::tools::error::{ConfigError, ToolError};
use crate::domains::tools::handlers::{ToolBinding, ToolImplementation, outcome_envelope};
use crate::domains::tools::schema::{Failure, ToolParams, ValidatedInput, non_blank};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "check_params", skip_on_field_errors = false))]
pub struct ParseStructureParams {
    /// Structure file content (CIF, XYZ, POSCAR) or file path.
    #[validate(length(min = 1))]
    pub data: String,
}

fn check_params(params: &ParseStructureParams) -> Result<(), validator::ValidationError> {
    non_blank("data", &params.data)
}

impl ToolParams for ParseStructureParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct ParseStructureOutput {
    pub success: bool,
    /// Number of atoms in the structure.
    #[validate(range(min = 1))]
    pub num_atoms: usize,
    /// Chemical formula (Hill order).
    #[validate(length(min = 1))]
    pub formula: String,
    /// Structure in the form the calculation tools accept.
    #[validate(nested)]
    pub atoms_dict: AtomsDict,
    /// Human-readable result message.
    pub message: String,
}

impl ParseStructureOutput {
    fn parsed(structure: &Structure) -> Self {
        let formula = structure.formula();
        Self {
            success: true,
            num_atoms: structure.len(),
            message: format!(
                "Successfully parsed structure: {} ({} atoms)",
                formula,
                structure.len()
            ),
            formula,
            atoms_dict: structure.to_atoms_dict(),
        }
    }
}

/// Structure parsing tool implementation.
#[derive(Debug, Clone, Default)]
pub struct ParseStructureTool;

impl ParseStructureTool {
    /// Function name used by tool definitions.
    pub const NAME: &'static str = "parse_structure";

    pub fn binding() -> Result<ToolBinding, ConfigError> {
        ToolBinding::of::<ParseStructureParams, ParseStructureOutput>(Arc::new(Self))
    }

    /// Parse content, reading it from disk first when `data` names a file.
    #[instrument(skip_all)]
    pub async fn execute(params: &ParseStructureParams) -> Result<ParseStructureOutput, Failure> {
        let parsing_error = |reason: String| {
            warn!("Structure parsing failed: {}", reason);
            Failure::new(reason.clone(), format!("Parsing error: {}", reason))
        };

        let content = load_structure_source(&params.data).await.map_err(parsing_error)?;
        let structure = parse_structure(&content).map_err(parsing_error)?;
        Ok(ParseStructureOutput::parsed(&structure))
    }
}

#[async_trait::async_trait]
impl ToolImplementation for ParseStructureTool {
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let params: ParseStructureParams = input
            .into_params()
            .map_err(|e| ToolError::internal(format!("parse parameters: {}", e)))?;
        outcome_envelope(&Self::execute(&params).await)
    }
}
