//! Geometry optimization tool.
//!
//! Relaxes a structure from `parse_structure` until the largest force
//! component drops to `fmax` or `max_steps` is reached. Reaching the step
//! limit is still a successful call; `metadata.converged` tells the two
//! apart.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::backend::{ASE_DEPENDENCY, AtomisticBackend, OptimizeRequest, OptimizeResult};
use super::structure::AtomsDict;
use crate::domains::tools::error::{ConfigError, ToolError};
use crate::domains::tools::handlers::{ToolBinding, ToolImplementation, outcome_envelope};
use crate::domains::tools::schema::{
    Failure, ToolParams, ValidatedInput, field_error, strictly_positive,
};

/// Optimizers a backend is asked to run.
pub const OPTIMIZERS: [&str; 3] = ["BFGS", "LBFGS", "FIRE"];

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "check_params", skip_on_field_errors = false))]
pub struct OptimizeGeometryParams {
    /// Structure as returned by `parse_structure`.
    #[validate(nested)]
    pub atoms_dict: AtomsDict,
    /// Force convergence criterion in eV/Å.
    #[serde(default = "default_fmax")]
    #[schemars(extend("exclusiveMinimum" = 0))]
    pub fmax: f64,
    /// Maximum number of optimization steps.
    #[serde(default = "default_max_steps")]
    #[validate(range(min = 1, max = 1000))]
    pub max_steps: u32,
    /// Optimizer: BFGS, LBFGS or FIRE.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    /// Whether to relax the cell as well as the positions.
    #[serde(default)]
    pub relax_cell: bool,
    /// Whether to preserve the symmetry of the structure.
    #[serde(default = "enabled")]
    pub fix_symmetry: bool,
}

fn default_fmax() -> f64 {
    0.05
}

fn default_max_steps() -> u32 {
    200
}

fn default_optimizer() -> String {
    OPTIMIZERS[0].to_string()
}

fn enabled() -> bool {
    true
}

fn check_params(params: &OptimizeGeometryParams) -> Result<(), validator::ValidationError> {
    strictly_positive("fmax", params.fmax)?;
    if !OPTIMIZERS.contains(&params.optimizer.as_str()) {
        return Err(field_error(
            "optimizer",
            "unknown_optimizer",
            format!(
                "unknown optimizer '{}', expected one of {}",
                params.optimizer,
                OPTIMIZERS.join(", ")
            ),
        ));
    }
    Ok(())
}

impl ToolParams for OptimizeGeometryParams {
    fn normalize(&mut self) {
        self.optimizer = self.optimizer.trim().to_ascii_uppercase();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct OptimizationMetadata {
    /// Whether the force criterion was met.
    pub converged: bool,
    /// Largest force component after the last step, in eV/Å.
    pub final_fmax: f64,
    /// Steps taken.
    pub steps: u32,
    /// Energy before the first step, in eV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_energy: Option<f64>,
    /// Energy of the optimized structure, in eV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_energy: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct OptimizeGeometryOutput {
    pub success: bool,
    /// Relaxed structure.
    #[validate(nested)]
    pub optimized_atoms_dict: AtomsDict,
    #[validate(nested)]
    pub metadata: OptimizationMetadata,
    pub message: String,
}

/// Geometry optimization tool implementation.
#[derive(Clone)]
pub struct OptimizeGeometryTool {
    backend: Option<Arc<dyn AtomisticBackend>>,
}

impl OptimizeGeometryTool {
    /// Function name used by tool definitions.
    pub const NAME: &'static str = "optimize_geometry";

    pub fn new(backend: Option<Arc<dyn AtomisticBackend>>) -> Self {
        Self { backend }
    }

    pub fn binding(backend: Option<Arc<dyn AtomisticBackend>>) -> Result<ToolBinding, ConfigError> {
        Ok(
            ToolBinding::of::<OptimizeGeometryParams, OptimizeGeometryOutput>(Arc::new(
                Self::new(backend),
            ))?
            .requiring(ASE_DEPENDENCY),
        )
    }

    #[instrument(skip_all, fields(atoms = params.atoms_dict.len(), optimizer = %params.optimizer))]
    pub async fn execute(&self, params: OptimizeGeometryParams) -> Result<OptimizeGeometryOutput, Failure> {
        let optimization_error =
            |reason: String| Failure::new(reason.clone(), format!("Optimization error: {}", reason));

        let Some(backend) = &self.backend else {
            return Err(optimization_error("no atomistic backend configured".into()));
        };

        let atom_count = params.atoms_dict.len();
        let fmax = params.fmax;
        let request = OptimizeRequest {
            atoms: params.atoms_dict,
            fmax,
            max_steps: params.max_steps,
            optimizer: params.optimizer,
            relax_cell: params.relax_cell,
            fix_symmetry: params.fix_symmetry,
        };
        info!("Optimizing with backend {}", backend.name());
        let OptimizeResult {
            atoms,
            final_fmax,
            steps,
            initial_energy,
            final_energy,
        } = backend.optimize(&request).await.map_err(|reason| {
            warn!("Optimization failed: {}", reason);
            optimization_error(reason)
        })?;

        if atoms.len() != atom_count {
            return Err(optimization_error(format!(
                "backend returned {} atom(s) for a structure of {}",
                atoms.len(),
                atom_count
            )));
        }

        let converged = final_fmax <= fmax;
        let message = format!(
            "Optimization {} after {} steps. Final fmax: {:.4} eV/Å, Energy: {:.4} eV",
            if converged { "converged" } else { "did not converge" },
            steps,
            final_fmax,
            final_energy
        );

        Ok(OptimizeGeometryOutput {
            success: true,
            optimized_atoms_dict: atoms,
            metadata: OptimizationMetadata {
                converged,
                final_fmax,
                steps,
                initial_energy,
                final_energy: Some(final_energy),
            },
            message,
        })
    }
}

#[async_trait::async_trait]
impl ToolImplementation for OptimizeGeometryTool {
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let params: OptimizeGeometryParams = input
            .into_params()
            .map_err(|e| ToolError::internal(format!("optimization parameters: {}", e)))?;
        outcome_envelope(&self.execute(params).await)
    }
}
