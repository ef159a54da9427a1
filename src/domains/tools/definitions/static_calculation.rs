//! Static calculation tool.
//!
//! Single-point evaluation of a structure from `parse_structure`: total
//! energy, optionally per atom, with forces and virial on request. The
//! geometry is never changed.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::backend::{ASE_DEPENDENCY, AtomisticBackend, StaticRequest, StaticResult};
use super::structure::AtomsDict;
use crate::domains::tools::error::{ConfigError, ToolError};
use crate::domains::tools::handlers::{ToolBinding, ToolImplementation, outcome_envelope};
use crate::domains::tools::schema::{Failure, ToolParams, ValidatedInput};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct StaticCalculationParams {
    /// Structure as returned by `parse_structure`.
    #[validate(nested)]
    pub atoms_dict: AtomsDict,
    /// Whether to compute energy per atom.
    #[serde(default)]
    pub normalize_per_atom: bool,
    /// Whether to compute atomic forces.
    #[serde(default = "enabled")]
    pub compute_forces: bool,
    /// Whether to compute the virial tensor.
    #[serde(default)]
    pub compute_virial: bool,
}

fn enabled() -> bool {
    true
}

impl ToolParams for StaticCalculationParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct StaticCalculationOutput {
    pub success: bool,
    /// Total energy in eV.
    pub total_energy: f64,
    /// Energy per atom in eV/atom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_per_atom: Option<f64>,
    /// Atomic forces in eV/Å, one vector per atom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<[f64; 3]>>,
    /// Virial tensor in eV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virial: Option<[[f64; 3]; 3]>,
    pub message: String,
}

/// Largest absolute force component.
pub fn max_force(forces: &[[f64; 3]]) -> f64 {
    forces.iter().flatten().fold(0.0, |max, f| max.max(f.abs()))
}

/// Static calculation tool implementation.
#[derive(Clone)]
pub struct StaticCalculationTool {
    backend: Option<Arc<dyn AtomisticBackend>>,
}

impl StaticCalculationTool {
    /// Function name used by tool definitions.
    pub const NAME: &'static str = "static_calculation";

    pub fn new(backend: Option<Arc<dyn AtomisticBackend>>) -> Self {
        Self { backend }
    }

    pub fn binding(backend: Option<Arc<dyn AtomisticBackend>>) -> Result<ToolBinding, ConfigError> {
        Ok(
            ToolBinding::of::<StaticCalculationParams, StaticCalculationOutput>(Arc::new(
                Self::new(backend),
            ))?
            .requiring(ASE_DEPENDENCY),
        )
    }

    #[instrument(skip_all, fields(atoms = params.atoms_dict.len()))]
    pub async fn execute(&self, params: StaticCalculationParams) -> Result<StaticCalculationOutput, Failure> {
        let calculation_error =
            |reason: String| Failure::new(reason.clone(), format!("Calculation error: {}", reason));

        let Some(backend) = &self.backend else {
            return Err(calculation_error("no atomistic backend configured".into()));
        };

        let atom_count = params.atoms_dict.len();
        let request = StaticRequest {
            atoms: params.atoms_dict,
            compute_forces: params.compute_forces,
            compute_virial: params.compute_virial,
        };
        info!("Static calculation with backend {}", backend.name());
        let StaticResult {
            energy,
            forces,
            virial,
        } = backend.static_calculation(&request).await.map_err(|reason| {
            warn!("Static calculation failed: {}", reason);
            calculation_error(reason)
        })?;

        let forces = if params.compute_forces {
            let forces = forces
                .ok_or_else(|| calculation_error("backend returned no forces".into()))?;
            if forces.len() != atom_count {
                return Err(calculation_error(format!(
                    "backend returned {} force vector(s) for {} atom(s)",
                    forces.len(),
                    atom_count
                )));
            }
            Some(forces)
        } else {
            None
        };
        let virial = if params.compute_virial { virial } else { None };
        let energy_per_atom = params
            .normalize_per_atom
            .then(|| energy / atom_count as f64);

        let mut parts = vec![format!("Total energy: {:.4} eV", energy)];
        if let Some(per_atom) = energy_per_atom {
            parts.push(format!("Energy/atom: {:.4} eV/atom", per_atom));
        }
        if let Some(forces) = &forces {
            parts.push(format!("Max force: {:.4} eV/Å", max_force(forces)));
        }

        Ok(StaticCalculationOutput {
            success: true,
            total_energy: energy,
            energy_per_atom,
            forces,
            virial,
            message: format!("Static calculation completed. {}", parts.join(", ")),
        })
    }
}

#[async_trait::async_trait]
impl ToolImplementation for StaticCalculationTool {
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let params: StaticCalculationParams = input
            .into_params()
            .map_err(|e| ToolError::internal(format!("static calculation parameters: {}", e)))?;
        outcome_envelope(&self.execute(params).await)
    }
}
