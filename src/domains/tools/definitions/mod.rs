//! Built-in MOF tools.
//!
//! Each tool lives in its own file and publishes a [`ToolBinding`] under its
//! function name. [`builtin_implementations`] assembles them into the table
//! the declarative catalog resolves against.
//!
//! [`ToolBinding`]: super::handlers::ToolBinding

pub mod backend;
pub mod calculate_energy;
pub mod mof_db;
pub mod optimize_geometry;
pub mod optimize_structure;
pub mod parse_structure;
pub mod search_mofs;
pub mod static_calculation;
pub mod structure;

use std::sync::Arc;

pub use backend::{ASE_DEPENDENCY, AtomisticBackend, CommandBackend};
pub use calculate_energy::CalculateEnergyTool;
pub use mof_db::{MofDatabase, MofRecord};
pub use optimize_geometry::OptimizeGeometryTool;
pub use optimize_structure::OptimizeStructureTool;
pub use parse_structure::ParseStructureTool;
pub use search_mofs::SearchMofsTool;
pub use static_calculation::StaticCalculationTool;
pub use structure::{AtomsDict, Structure, StructureFormat, parse_structure};

use super::error::ConfigError;
use super::handlers::ImplementationTable;

/// Shared collaborators the built-in tools are constructed with.
#[derive(Clone)]
pub struct Collaborators {
    pub database: Arc<MofDatabase>,
    pub backend: Option<Arc<dyn AtomisticBackend>>,
}

impl Collaborators {
    /// The sample database and no atomistic backend.
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            database: Arc::new(MofDatabase::sample()?),
            backend: None,
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn AtomisticBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// External dependencies these collaborators satisfy.
    pub fn available_dependencies(&self) -> Vec<String> {
        let mut available = Vec::new();
        if self.backend.is_some() {
            available.push(ASE_DEPENDENCY.to_string());
        }
        available
    }
}

/// Every built-in implementation, keyed by function name.
pub fn builtin_implementations(
    collaborators: &Collaborators,
) -> Result<ImplementationTable, ConfigError> {
    let backend = &collaborators.backend;
    Ok(ImplementationTable::new()
        .with(
            SearchMofsTool::NAME,
            SearchMofsTool::binding(collaborators.database.clone())?,
        )
        .with(
            CalculateEnergyTool::NAME,
            CalculateEnergyTool::binding(backend.clone())?,
        )
        .with(
            StaticCalculationTool::NAME,
            StaticCalculationTool::binding(backend.clone())?,
        )
        .with(OptimizeStructureTool::NAME, OptimizeStructureTool::binding()?)
        .with(
            OptimizeGeometryTool::NAME,
            OptimizeGeometryTool::binding(backend.clone())?,
        )
        .with(ParseStructureTool::NAME, ParseStructureTool::binding()?))
}
