//! In-memory MOF database shared by the search tool.
//!
//! Records are validated when the database is built and never change
//! afterwards, so the database can be shared across concurrent calls behind
//! an `Arc` without locking.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domains::tools::error::ConfigError;
use crate::domains::tools::schema::{ValidationError, non_blank, strictly_positive};

/// A single MOF record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "check_record", skip_on_field_errors = false))]
pub struct MofRecord {
    /// MOF name, e.g. `HKUST-1`.
    #[validate(length(min = 1))]
    pub name: String,
    /// Chemical formula.
    #[validate(length(min = 1))]
    pub formula: String,
    /// Surface area in m²/g.
    #[schemars(extend("exclusiveMinimum" = 0))]
    pub surface_area: f64,
}

fn check_record(record: &MofRecord) -> Result<(), validator::ValidationError> {
    non_blank("name", &record.name)?;
    non_blank("formula", &record.formula)?;
    strictly_positive("surface_area", record.surface_area)
}

impl MofRecord {
    pub fn new(name: impl Into<String>, formula: impl Into<String>, surface_area: f64) -> Self {
        Self {
            name: name.into(),
            formula: formula.into(),
            surface_area,
        }
    }
}

/// Read-only collection of MOF records.
#[derive(Debug, Clone, Default)]
pub struct MofDatabase {
    records: Vec<MofRecord>,
}

impl MofDatabase {
    /// Build a database, rejecting blank names/formulas and non-positive
    /// areas. Every bad record is reported, as `records[i].field`.
    pub fn new(records: Vec<MofRecord>) -> Result<Self, ConfigError> {
        let mut violations = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if let Err(errors) = record.validate() {
                let found = ValidationError::from_validator(&errors, "record");
                violations.extend(found.violations().iter().cloned().map(|mut v| {
                    v.field = format!("records[{}].{}", index, v.field);
                    v
                }));
            }
        }
        if !violations.is_empty() {
            return Err(ConfigError::Dataset(ValidationError::new(violations)));
        }
        Ok(Self { records })
    }

    /// The built-in sample dataset.
    pub fn sample() -> Result<Self, ConfigError> {
        Self::new(vec![
            MofRecord::new("HKUST-1", "Cu3(BTC)2", 1850.0),
            MofRecord::new("MOF-5", "Zn4O(BDC)3", 3800.0),
            MofRecord::new("UiO-66", "Zr6O4(OH)4(BDC)6", 1187.0),
        ])
    }

    /// Case-insensitive substring match on name or formula, in dataset order.
    pub fn search(&self, query: &str) -> Vec<&MofRecord> {
        let needle = query.to_lowercase();
        self.records
            .iter()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle) || r.formula.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
