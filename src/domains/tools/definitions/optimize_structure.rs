//! Structure optimization tool.
//!
//! Acknowledges an optimization request for a named structure. The
//! optimization itself runs outside this server.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use validator::Validate;

use crate::domains::tools::error::{ConfigError, ToolError};
use crate::domains::tools::handlers::{ToolBinding, ToolImplementation, envelope};
use crate::domains::tools::schema::{ToolParams, ValidatedInput};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct OptimizeStructureParams {
    /// Name of the structure to optimize.
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

impl ToolParams for OptimizeStructureParams {
    fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct OptimizeStructureOutput {
    pub success: bool,
    #[validate(length(min = 1))]
    pub structure_name: String,
    pub message: String,
}

/// Structure optimization tool implementation.
#[derive(Debug, Clone, Default)]
pub struct OptimizeStructureTool;

impl OptimizeStructureTool {
    /// Function name used by tool definitions.
    pub const NAME: &'static str = "optimize_structure";

    pub fn binding() -> Result<ToolBinding, ConfigError> {
        ToolBinding::of::<OptimizeStructureParams, OptimizeStructureOutput>(Arc::new(Self))
    }

    pub fn execute(params: &OptimizeStructureParams) -> OptimizeStructureOutput {
        info!("Optimization requested for {}", params.name);
        OptimizeStructureOutput {
            success: true,
            structure_name: params.name.clone(),
            message: format!("Successfully initiated optimization for {}", params.name),
        }
    }
}

#[async_trait::async_trait]
impl ToolImplementation for OptimizeStructureTool {
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let params: OptimizeStructureParams = input
            .into_params()
            .map_err(|e| ToolError::internal(format!("optimization parameters: {}", e)))?;
        envelope(&Self::execute(&params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_optimize_structure() {
        let output = OptimizeStructureTool::execute(&OptimizeStructureParams {
            name: "HKUST-1".into(),
        });
        assert!(output.success);
        assert_eq!(output.structure_name, "HKUST-1");
        assert_eq!(output.message, "Successfully initiated optimization for HKUST-1");
    }

    #[test]
    fn test_name_is_trimmed_before_acknowledgement() {
        let input = OptimizeStructureTool::binding()
            .unwrap()
            .input_schema
            .validate(&json!({ "name": "  UiO-66  " }))
            .unwrap();
        let value = tokio_test::block_on(OptimizeStructureTool.call(input)).unwrap();
        assert_eq!(value["structure_name"], "UiO-66");
    }

    #[test]
    fn test_blank_name_rejected() {
        let err = OptimizeStructureTool::binding()
            .unwrap()
            .input_schema
            .validate(&json!({ "name": "   " }))
            .unwrap_err();
        assert!(err.mentions("name"));
    }
}
