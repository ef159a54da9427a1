//! Tool implementations and the table they are resolved from.
//!
//! Every tool body sits behind [`ToolImplementation`]. Implementations are
//! bundled with their schemas into a [`ToolBinding`] and published under a
//! function name in an [`ImplementationTable`]. The declarative catalog
//! resolves names against that table once, at startup; the dispatch path
//! never looks anything up by function name.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use validator::Validate;

use super::error::{ConfigError, ToolError};
use super::schema::{Failure, InputSchema, OutputSchema, ToolParams, ValidatedInput};

/// Trait for the body of a tool.
///
/// Receives arguments that already passed the tool's input schema and
/// returns an envelope for the output schema to check. A domain failure
/// (unparsable structure, nothing to compute) is still `Ok` with
/// `success: false`; `Err` is reserved for faults the tool cannot describe
/// in its own envelope.
#[async_trait::async_trait]
pub trait ToolImplementation: Send + Sync {
    /// Execute the tool with validated arguments.
    async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError>;
}

/// Serialize a typed output model into an envelope value.
pub fn envelope<T: Serialize>(output: &T) -> Result<Value, ToolError> {
    serde_json::to_value(output)
        .map_err(|e| ToolError::internal(format!("failed to encode tool output: {}", e)))
}

/// Serialize either a typed success output or a [`Failure`].
pub fn outcome_envelope<T: Serialize>(outcome: &Result<T, Failure>) -> Result<Value, ToolError> {
    match outcome {
        Ok(output) => envelope(output),
        Err(failure) => envelope(failure),
    }
}

/// An implementation together with the schemas it was written against.
#[derive(Clone)]
pub struct ToolBinding {
    pub implementation: Arc<dyn ToolImplementation>,
    pub input_schema: InputSchema,
    pub output_schema: OutputSchema,
    /// External dependencies the implementation always needs.
    pub requires: Vec<String>,
}

impl ToolBinding {
    pub fn new(
        implementation: Arc<dyn ToolImplementation>,
        input_schema: InputSchema,
        output_schema: OutputSchema,
    ) -> Self {
        Self {
            implementation,
            input_schema,
            output_schema,
            requires: Vec::new(),
        }
    }

    /// Bind an implementation to the schemas derived from its parameter
    /// and output structs.
    pub fn of<P, O>(implementation: Arc<dyn ToolImplementation>) -> Result<Self, ConfigError>
    where
        P: ToolParams,
        O: DeserializeOwned + Serialize + JsonSchema + Validate + 'static,
    {
        Ok(Self::new(
            implementation,
            InputSchema::of::<P>()?,
            OutputSchema::of::<O>()?,
        ))
    }

    pub fn requiring(mut self, dependency: impl Into<String>) -> Self {
        self.requires.push(dependency.into());
        self
    }
}

/// Known implementations, keyed by function name.
#[derive(Clone, Default)]
pub struct ImplementationTable {
    bindings: HashMap<String, ToolBinding>,
}

impl ImplementationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a binding. A later binding under the same name replaces the
    /// earlier one.
    pub fn insert(&mut self, function_name: impl Into<String>, binding: ToolBinding) {
        self.bindings.insert(function_name.into(), binding);
    }

    pub fn with(mut self, function_name: impl Into<String>, binding: ToolBinding) -> Self {
        self.insert(function_name, binding);
        self
    }

    pub fn resolve(&self, function_name: &str) -> Option<&ToolBinding> {
        self.bindings.get(function_name)
    }

    /// Sorted function names.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Minimal implementations for registry and dispatcher tests.

    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
    #[serde(deny_unknown_fields)]
    pub struct EchoParams {
        #[validate(length(min = 1, max = 50))]
        pub text: String,
    }

    impl ToolParams for EchoParams {
        fn normalize(&mut self) {
            self.text = self.text.trim().to_string();
        }
    }

    #[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
    #[serde(deny_unknown_fields)]
    pub struct EchoOutput {
        pub success: bool,
        pub text: String,
    }

    /// Returns `{"success": true, "text": <text>}`.
    pub struct Echo;

    #[async_trait::async_trait]
    impl ToolImplementation for Echo {
        async fn call(&self, input: ValidatedInput) -> Result<Value, ToolError> {
            Ok(json!({ "success": true, "text": input.str("text").unwrap_or_default() }))
        }
    }

    /// Always panics.
    pub struct Panicking;

    #[async_trait::async_trait]
    impl ToolImplementation for Panicking {
        async fn call(&self, _input: ValidatedInput) -> Result<Value, ToolError> {
            panic!("secret internal detail");
        }
    }

    /// Always returns the given error.
    pub struct Failing(pub &'static str);

    #[async_trait::async_trait]
    impl ToolImplementation for Failing {
        async fn call(&self, _input: ValidatedInput) -> Result<Value, ToolError> {
            Err(ToolError::execution_failed(self.0))
        }
    }

    /// Returns a fixed value regardless of input.
    pub struct Fixed(pub Value);

    #[async_trait::async_trait]
    impl ToolImplementation for Fixed {
        async fn call(&self, _input: ValidatedInput) -> Result<Value, ToolError> {
            Ok(self.0.clone())
        }
    }

    pub fn echo_binding() -> ToolBinding {
        ToolBinding::of::<EchoParams, EchoOutput>(Arc::new(Echo)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::echo_binding;
    use super::*;

    #[test]
    fn test_table_resolves_by_function_name() {
        let table = ImplementationTable::new()
            .with("echo", echo_binding())
            .with("echo_with_deps", echo_binding().requiring("ase"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.function_names(), vec!["echo", "echo_with_deps"]);
        assert!(table.resolve("echo").unwrap().requires.is_empty());
        assert_eq!(table.resolve("echo_with_deps").unwrap().requires, vec!["ase"]);
        assert!(table.resolve("missing").is_none());
    }

    #[tokio::test]
    async fn test_binding_executes_implementation() {
        let binding = echo_binding();
        let input = binding
            .input_schema
            .validate(&serde_json::json!({ "text": " hi " }))
            .unwrap();
        let value = binding.implementation.call(input).await.unwrap();
        assert_eq!(value["text"], "hi");
    }

    #[test]
    fn test_outcome_envelope_serializes_both_sides() {
        let ok: Result<serde_json::Value, Failure> = Ok(serde_json::json!({ "success": true }));
        assert_eq!(outcome_envelope(&ok).unwrap()["success"], true);

        let failed: Result<serde_json::Value, Failure> =
            Err(Failure::new("no backend", "Calculation error: no backend"));
        let value = outcome_envelope(&failed).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "no backend");
    }
}
