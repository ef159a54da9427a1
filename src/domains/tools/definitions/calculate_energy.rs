//! Energy calculation tool.
//!
//! Computes the potential energy of a structure (file content or a path)
//! through an [`AtomisticBackend`]. The tool declares the `ase` dependency;
//! without a backend the dispatcher answers with a `dependency_unavailable`
//! envelope and this code never runs.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::backend::{ASE_DEPENDENCY, AtomisticBackend};
use super::structure::load_structure_source;
use crate::domains::tools::error::{ConfigError, ToolError};
use crate::domains::tools::handlers::{ToolBinding, ToolImplementation, outcome_envelope};
use crate::domains::tools::schema::{Failure, ToolParams, ValidatedInput, non_blank};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "check_params", skip_on_field_errors = false))]
pub struct CalculateEnergyParams {
    /// CIF file content as string or file path.
    #[validate(length(min = 1))]
    pub data: String,
}

fn check_params(params: &CalculateEnergyParams) -> Result<(), validator::ValidationError> {
    non_blank("data", &params.data)
}

impl ToolParams for CalculateEnergyParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct CalculateEnergyOutput {
    pub success: bool,
    /// Calculated energy in eV.
    pub energy: f64,
    /// Human-readable result message.
    pub message: String,
}

/// Energy calculation tool implementation.
#[derive(Clone)]
pub struct CalculateEnergyTool {
    backend: Option<Arc<dyn AtomisticBackend>>,
}

impl CalculateEnergyTool {
    /// Function name used by tool definitions.
    pub const NAME: &'static str = "calculate_energy";

    pub fn new(backend: Option<Arc<dyn AtomisticBackend>>) -> Self {
        Self { backend }
    }

    pub fn binding(backend: Option<Arc<dyn AtomisticBackend>>) -> Result<ToolBinding, ConfigError> {
        Ok(
            ToolBinding::of::<CalculateEnergyParams, CalculateEnergyOutput>(Arc::new(Self::new(
                backend,
            )))?
            .requiring(ASE_DEPENDENCY),
        )
    }

    #[instrument(skip_all)]
    pub async fn execute(&self, params: &CalculateEnergyParams) -> Result<CalculateEnergyOutput, Failure> {
        let Some(backend) = &self.backend else {
            warn!("Energy calculation requested without a backend");
            return Err(Failure::new(
                "ASE library not installed",
                "Error: no energy backend configured (set MCP_ENERGY_COMMAND)",
            ));
        };

        let structure = load_structure_source(&params.data)
            .await
            .map_err(|reason| Failure::new(reason.clone(), format!("Calculation error: {}", reason)))?;

        info!("Calculating energy with backend {}", backend.name());
        match backend.potential_energy(&structure).await {
            Ok(energy) => Ok(CalculateEnergyOutput {
                success: true,
                energy,
                message: format!("Energy: {:.4} eV", energy),
            }),
            Err(reason) => {
                warn!("Energy calculation failed: {}", reason);
                Err(Failure::new(
                    reason.clone(),
                    format!("Calculation error: {}", reason),
                ))
            }
        }
    }
}

#[async_trait::async_trait]
impl ToolImplementation for CalculateEnergyTool {
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let params: CalculateEnergyParams = input
            .into_params()
            .map_err(|e| ToolError::internal(format!("energy parameters: {}", e)))?;
        outcome_envelope(&self.execute(&params).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Returns a fixed result and remembers the structure it was given.
    struct FixedEnergy {
        result: Result<f64, &'static str>,
        seen: Mutex<Option<String>>,
    }

    impl FixedEnergy {
        fn new(result: Result<f64, &'static str>) -> Arc<Self> {
            Arc::new(Self {
                result,
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait::async_trait]
    impl AtomisticBackend for FixedEnergy {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn potential_energy(&self, structure: &str) -> Result<f64, String> {
            *self.seen.lock().unwrap() = Some(structure.to_string());
            self.result.map_err(String::from)
        }
    }

    fn params(data: &str) -> CalculateEnergyParams {
        CalculateEnergyParams { data: data.into() }
    }

    fn with(backend: Arc<FixedEnergy>) -> CalculateEnergyTool {
        CalculateEnergyTool::new(Some(backend))
    }

    #[tokio::test]
    async fn test_energy_success() {
        let output = with(FixedEnergy::new(Ok(-12.34567)))
            .execute(&params("data_test\n_cell_length_a 10"))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.energy, -12.34567);
        assert_eq!(output.message, "Energy: -12.3457 eV");
    }

    #[tokio::test]
    async fn test_backend_failure_is_domain_failure() {
        let binding = CalculateEnergyTool::binding(None).unwrap();
        let failure = with(FixedEnergy::new(Err("Invalid CIF format")))
            .execute(&params("garbage"))
            .await
            .unwrap_err();
        assert_eq!(failure.error.as_deref(), Some("Invalid CIF format"));
        assert_eq!(failure.message, "Calculation error: Invalid CIF format");
        let value = outcome_envelope::<CalculateEnergyOutput>(&Err(failure)).unwrap();
        assert!(binding.output_schema.validate(value).is_ok());
    }

    #[tokio::test]
    async fn test_missing_backend() {
        let failure = CalculateEnergyTool::new(None)
            .execute(&params("data_test"))
            .await
            .unwrap_err();
        assert_eq!(failure.error.as_deref(), Some("ASE library not installed"));
    }

    #[tokio::test]
    async fn test_file_path_is_read_before_the_backend_runs() {
        let cif = "data_test\n_cell_length_a 10\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(cif.as_bytes()).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let backend = FixedEnergy::new(Ok(-1.0));
        with(backend.clone()).execute(&params(&path)).await.unwrap();
        assert_eq!(backend.seen.lock().unwrap().as_deref(), Some(cif));

        with(backend.clone()).execute(&params(cif)).await.unwrap();
        assert_eq!(backend.seen.lock().unwrap().as_deref(), Some(cif));
    }

    #[test]
    fn test_blank_data_is_invalid_input() {
        let schema = CalculateEnergyTool::binding(None).unwrap().input_schema;
        for data in ["", "   ", "\n\t"] {
            let err = schema.validate(&serde_json::json!({ "data": data })).unwrap_err();
            assert_eq!(err.violations()[0].field, "data");
        }
        assert!(schema.validate(&serde_json::json!({ "data": "data_x" })).is_ok());
    }

    #[test]
    fn test_binding_requires_ase() {
        let binding = CalculateEnergyTool::binding(None).unwrap();
        assert_eq!(binding.requires, vec![ASE_DEPENDENCY.to_string()]);
    }
}
