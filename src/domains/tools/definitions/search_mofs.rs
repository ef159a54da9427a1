//! MOF search tool.
//!
//! Looks MOFs up by name or formula in the in-memory database.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use validator::Validate;

use super::mof_db::{MofDatabase, MofRecord};
use crate::domains::tools::error::{ConfigError, ToolError};
use crate::domains::tools::handlers::{ToolBinding, ToolImplementation, envelope};
use crate::domains::tools::schema::{ToolParams, ValidatedInput, field_error};

/// Parameters for MOF search.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct SearchMofsParams {
    /// Search query for MOF name or formula.
    #[validate(length(min = 1, max = 200))]
    pub query: String,
}

impl ToolParams for SearchMofsParams {
    fn normalize(&mut self) {
        self.query = self.query.trim().to_string();
    }
}

/// Structured output for MOF search.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "check_count", skip_on_field_errors = false))]
pub struct SearchMofsOutput {
    pub success: bool,
    /// Matching MOF records.
    #[validate(nested)]
    pub results: Vec<MofRecord>,
    /// Number of results found.
    pub count: usize,
    /// Additional message or error details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn check_count(output: &SearchMofsOutput) -> Result<(), validator::ValidationError> {
    if output.count != output.results.len() {
        return Err(field_error(
            "count",
            "count_mismatch",
            format!(
                "count is {} but {} result(s) were returned",
                output.count,
                output.results.len()
            ),
        ));
    }
    Ok(())
}

/// MOF search tool implementation.
#[derive(Debug, Clone)]
pub struct SearchMofsTool {
    database: Arc<MofDatabase>,
}

impl SearchMofsTool {
    /// Function name used by tool definitions.
    pub const NAME: &'static str = "search_mofs";

    pub fn new(database: Arc<MofDatabase>) -> Self {
        Self { database }
    }

    pub fn binding(database: Arc<MofDatabase>) -> Result<ToolBinding, ConfigError> {
        ToolBinding::of::<SearchMofsParams, SearchMofsOutput>(Arc::new(Self::new(database)))
    }

    /// Execute the search.
    #[instrument(skip_all, fields(query = %params.query))]
    pub fn execute(&self, params: &SearchMofsParams) -> SearchMofsOutput {
        let results: Vec<MofRecord> = self
            .database
            .search(&params.query)
            .into_iter()
            .cloned()
            .collect();
        let count = results.len();
        info!("MOF search matched {} record(s)", count);

        let message = if count > 0 {
            format!("Found {} MOF(s)", count)
        } else {
            format!("No MOFs found for '{}'", params.query)
        };

        SearchMofsOutput {
            success: true,
            results,
            count,
            message: Some(message),
        }
    }
}

#[async_trait::async_trait]
impl ToolImplementation for SearchMofsTool {
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let params: SearchMofsParams = input
            .into_params()
            .map_err(|e| ToolError::internal(format!("search parameters: {}", e)))?;
        envelope(&self.execute(&params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn database() -> Arc<MofDatabase> {
        Arc::new(MofDatabase::sample().unwrap())
    }

    fn tool() -> SearchMofsTool {
        SearchMofsTool::new(database())
    }

    fn params(query: &str) -> SearchMofsParams {
        SearchMofsParams {
            query: query.to_string(),
        }
    }

    #[test]
    fn test_search_found() {
        let output = tool().execute(&params("MOF-5"));
        assert!(output.success);
        assert_eq!(output.count, 1);
        assert_eq!(output.results[0].surface_area, 3800.0);
        assert_eq!(output.message.as_deref(), Some("Found 1 MOF(s)"));
    }

    #[test]
    fn test_search_not_found() {
        let output = tool().execute(&params("NonExistent"));
        assert!(output.success);
        assert_eq!(output.count, 0);
        assert!(output.results.is_empty());
        assert_eq!(
            output.message.as_deref(),
            Some("No MOFs found for 'NonExistent'")
        );
    }

    #[test]
    fn test_search_case_insensitive() {
        assert_eq!(tool().execute(&params("hkust")).count, 1);
    }

    #[test]
    fn test_input_schema_trims_and_bounds() {
        let schema = SearchMofsTool::binding(database()).unwrap().input_schema;
        let input = schema.validate(&json!({ "query": "  UiO-66  " })).unwrap();
        assert_eq!(input.str("query"), Some("UiO-66"));
        assert!(schema.validate(&json!({ "query": "" })).is_err());
        assert!(schema.validate(&json!({ "query": "   " })).unwrap_err().mentions("query"));
        assert!(schema.validate(&json!({ "query": "a".repeat(201) })).is_err());
    }

    #[tokio::test]
    async fn test_output_passes_schema() {
        let binding = SearchMofsTool::binding(database()).unwrap();
        let input = binding.input_schema.validate(&json!({ "query": "BDC" })).unwrap();
        let value = binding.implementation.call(input).await.unwrap();
        let value = binding.output_schema.validate(value).unwrap();

        let results = value["results"].as_array().unwrap();
        assert_eq!(value["count"], json!(results.len()));
        assert_eq!(results.len(), 2);
        for record in results {
            assert!(record["name"].as_str().is_some_and(|s| !s.is_empty()));
            assert!(record["formula"].as_str().is_some_and(|s| !s.is_empty()));
            assert!(record["surface_area"].as_f64().is_some_and(|a| a > 0.0));
        }
        assert_eq!(results[1]["name"], "UiO-66");
    }

    #[test]
    fn test_output_schema_rejects_bad_results() {
        let schema = SearchMofsTool::binding(database()).unwrap().output_schema;

        let err = schema
            .validate(json!({ "success": true, "results": [{}], "count": 1 }))
            .unwrap_err();
        assert!(err.mentions("results[0].name"));
        assert!(err.mentions("results[0].formula"));
        assert!(err.mentions("results[0].surface_area"));

        let err = schema
            .validate(json!({
                "success": true,
                "results": [{ "name": "MOF-5", "formula": "Zn4O(BDC)3", "surface_area": 3800.0 }],
                "count": 3
            }))
            .unwrap_err();
        assert!(err.mentions("count"));

        let err = schema
            .validate(json!({
                "success": true,
                "results": [{ "name": "MOF-5", "formula": "Zn4O(BDC)3", "surface_area": -1.0 }],
                "count": 1
            }))
            .unwrap_err();
        assert!(err.mentions("results[0].surface_area"));
    }
}
