//! Dispatcher - turns `(tool name, raw arguments)` into an envelope.
//!
//! Every call walks `RECEIVED → RESOLVED → INPUT_VALID → EXECUTED →
//! OUTPUT_VALID → RETURNED`. Each step can leave early with an error
//! envelope, so every path ends with a well-formed response. Panics raised
//! by an implementation are caught here and reported without their payload.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{Instrument, debug, error, info_span, warn};

use super::error::ToolError;
use super::registry::ToolRegistry;
use super::schema::{SUCCESS_FIELD, canonical_json};

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchExit {
    /// The tool ran and its envelope passed the output schema.
    Ok,
    NotFound,
    InputInvalid,
    DependencyMissing,
    ExecutionFailed,
    OutputInvalid,
}

impl DispatchExit {
    fn for_error(error: &ToolError) -> Self {
        match error {
            ToolError::NotFound(_) => Self::NotFound,
            ToolError::InvalidInput(_) => Self::InputInvalid,
            ToolError::DependencyUnavailable { .. } => Self::DependencyMissing,
            ToolError::InvalidOutput(_) => Self::OutputInvalid,
            ToolError::ExecutionFailed(_) | ToolError::Internal(_) => Self::ExecutionFailed,
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub exit: DispatchExit,
    /// Canonical JSON envelope.
    pub envelope: String,
    /// Value of the envelope's `success` field.
    pub success: bool,
}

/// Single entry point for tool calls.
///
/// Holds only immutable state, so one dispatcher can serve any number of
/// concurrent calls.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    available: Arc<BTreeSet<String>>,
}

impl Dispatcher {
    /// Create a dispatcher over a fully built registry.
    ///
    /// `available` names the external dependencies present in this process.
    pub fn new<I, S>(registry: Arc<ToolRegistry>, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registry,
            available: Arc::new(available.into_iter().map(Into::into).collect()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn is_available(&self, dependency: &str) -> bool {
        self.available.contains(dependency)
    }

    /// Invoke a tool and return its canonical JSON envelope.
    pub async fn invoke(&self, tool_name: &str, arguments: Value) -> String {
        self.dispatch(tool_name, arguments).await.envelope
    }

    /// Invoke a tool and report how the call ended along with the envelope.
    pub async fn dispatch(&self, tool_name: &str, arguments: Value) -> DispatchOutcome {
        let span = info_span!("dispatch", tool = %tool_name);

        async move {
            match self.run(tool_name, arguments).await {
                Ok(envelope) => {
                    let success = envelope
                        .get(SUCCESS_FIELD)
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    debug!(success, "Tool call completed");
                    DispatchOutcome {
                        exit: DispatchExit::Ok,
                        envelope: canonical_json(&envelope),
                        success,
                    }
                }
                Err(e) => {
                    warn!(kind = e.kind(), "Tool call failed: {}", e);
                    DispatchOutcome {
                        exit: DispatchExit::for_error(&e),
                        envelope: canonical_json(&error_envelope(&e)),
                        success: false,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, tool_name: &str, arguments: Value) -> Result<Value, ToolError> {
        let descriptor = self.registry.get(tool_name)?;

        let input = descriptor
            .input_schema()
            .validate(&arguments)
            .map_err(ToolError::InvalidInput)?;

        if let Some(missing) = descriptor
            .requires()
            .iter()
            .find(|d| !self.available.contains(d.as_str()))
        {
            return Err(ToolError::dependency_unavailable(descriptor.name(), missing));
        }

        let call = descriptor.implementation().call(input);
        let result = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    "Tool '{}' panicked: {}",
                    descriptor.name(),
                    panic_message(panic.as_ref())
                );
                return Err(ToolError::internal(format!(
                    "tool '{}' failed unexpectedly",
                    descriptor.name()
                )));
            }
        }?;

        descriptor
            .output_schema()
            .validate(result)
            .map_err(|e| {
                error!("Tool '{}' produced an invalid envelope: {}", descriptor.name(), e);
                ToolError::InvalidOutput(e)
            })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Build the error envelope for a failed call.
///
/// Output validation failures are the server's fault, so their field detail
/// stays in the logs and the caller gets a generic message.
pub fn error_envelope(error: &ToolError) -> Value {
    let mut envelope = Map::new();
    envelope.insert(SUCCESS_FIELD.into(), Value::Bool(false));
    envelope.insert("error".into(), Value::from(error.kind()));

    let message = match error {
        ToolError::InvalidOutput(_) => "Tool produced an invalid response".to_string(),
        other => other.to_string(),
    };
    envelope.insert("message".into(), Value::from(message));

    if let ToolError::InvalidInput(validation) = error {
        let details = serde_json::to_value(validation.violations()).unwrap_or(Value::Null);
        envelope.insert("details".into(), details);
    }

    Value::Object(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::tools::descriptor::{ToolCategory, ToolDescriptor};
    use crate::domains::tools::handlers::test_support::{Failing, Fixed, Panicking, echo_binding};
    use crate::domains::tools::handlers::{ToolBinding, ToolImplementation};
    use serde_json::json;

    fn describe(name: &str, implementation: Arc<dyn ToolImplementation>, requires: &[&str]) -> ToolDescriptor {
        let ToolBinding {
            input_schema,
            output_schema,
            ..
        } = echo_binding();
        ToolDescriptor::builder(name)
            .description("test tool")
            .category(ToolCategory::Utils)
            .requires(requires.iter().copied())
            .implementation(implementation)
            .input_schema(input_schema)
            .output_schema(output_schema)
            .build()
            .unwrap()
    }

    fn dispatcher(available: &[&str]) -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry
            .register(describe("echo", echo_binding().implementation, &[]))
            .unwrap();
        registry
            .register(describe("needs_ase", echo_binding().implementation, &["ase"]))
            .unwrap();
        registry
            .register(describe("explodes", Arc::new(Panicking), &[]))
            .unwrap();
        registry
            .register(describe("fails", Arc::new(Failing("backend offline")), &[]))
            .unwrap();
        registry
            .register(describe(
                "lies",
                Arc::new(Fixed(json!({ "success": true, "text": 42 }))),
                &[],
            ))
            .unwrap();
        registry
            .register(describe(
                "domain_failure",
                Arc::new(Fixed(json!({ "success": false, "error": "bad CIF", "message": "Parsing error: bad CIF" }))),
                &[],
            ))
            .unwrap();
        Dispatcher::new(Arc::new(registry), available.iter().copied())
    }

    fn parse(envelope: &str) -> Value {
        serde_json::from_str(envelope).unwrap()
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let outcome = dispatcher(&[]).dispatch("echo", json!({ "text": " hello " })).await;
        assert_eq!(outcome.exit, DispatchExit::Ok);
        assert!(outcome.success);
        assert_eq!(parse(&outcome.envelope), json!({ "success": true, "text": "hello" }));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let outcome = dispatcher(&[]).dispatch("nope", json!({})).await;
        assert_eq!(outcome.exit, DispatchExit::NotFound);
        let envelope = parse(&outcome.envelope);
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["error"], "not_found");
        assert!(envelope.get("details").is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_lists_fields() {
        let outcome = dispatcher(&[])
            .dispatch("echo", json!({ "text": "", "colour": "red" }))
            .await;
        assert_eq!(outcome.exit, DispatchExit::InputInvalid);
        let envelope = parse(&outcome.envelope);
        assert_eq!(envelope["error"], "invalid_input");
        let mut fields: Vec<_> = envelope["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap().to_string())
            .collect();
        fields.sort();
        assert_eq!(fields, vec!["colour", "text"]);
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let outcome = dispatcher(&[]).dispatch("echo", json!("just a string")).await;
        assert_eq!(outcome.exit, DispatchExit::InputInvalid);
        assert_eq!(parse(&outcome.envelope)["details"][0]["field"], "arguments");
    }

    #[tokio::test]
    async fn test_missing_dependency_skips_call() {
        let outcome = dispatcher(&[]).dispatch("needs_ase", json!({ "text": "x" })).await;
        assert_eq!(outcome.exit, DispatchExit::DependencyMissing);
        let envelope = parse(&outcome.envelope);
        assert_eq!(envelope["error"], "dependency_unavailable");
        assert!(envelope["message"].as_str().unwrap().contains("ase"));

        let outcome = dispatcher(&["ase"]).dispatch("needs_ase", json!({ "text": "x" })).await;
        assert_eq!(outcome.exit, DispatchExit::Ok);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let outcome = dispatcher(&[]).dispatch("explodes", json!({ "text": "x" })).await;
        assert_eq!(outcome.exit, DispatchExit::ExecutionFailed);
        let envelope = parse(&outcome.envelope);
        assert_eq!(envelope["error"], "internal_error");
        assert!(!outcome.envelope.contains("secret internal detail"));
    }

    #[tokio::test]
    async fn test_execution_error() {
        let outcome = dispatcher(&[]).dispatch("fails", json!({ "text": "x" })).await;
        assert_eq!(outcome.exit, DispatchExit::ExecutionFailed);
        assert_eq!(parse(&outcome.envelope)["error"], "execution_error");
    }

    #[tokio::test]
    async fn test_invalid_output() {
        let outcome = dispatcher(&[]).dispatch("lies", json!({ "text": "x" })).await;
        assert_eq!(outcome.exit, DispatchExit::OutputInvalid);
        let envelope = parse(&outcome.envelope);
        assert_eq!(envelope["error"], "invalid_output");
        assert!(envelope.get("details").is_none());
    }

    #[tokio::test]
    async fn test_domain_failure_is_a_valid_envelope() {
        let outcome = dispatcher(&[]).dispatch("domain_failure", json!({ "text": "x" })).await;
        assert_eq!(outcome.exit, DispatchExit::Ok);
        assert!(!outcome.success);
        assert_eq!(parse(&outcome.envelope)["error"], "bad CIF");
    }

    #[tokio::test]
    async fn test_repeated_calls_are_identical() {
        let dispatcher = dispatcher(&[]);
        let first = dispatcher.invoke("echo", json!({ "text": "same" })).await;
        let second = dispatcher.invoke("echo", json!({ "text": "same" })).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let dispatcher = dispatcher(&[]);
        let calls: Vec<_> = (0..16)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher
                        .invoke("echo", json!({ "text": format!("call-{}", i) }))
                        .await
                })
            })
            .collect();
        for (i, handle) in calls.into_iter().enumerate() {
            let envelope = parse(&handle.await.unwrap());
            assert_eq!(envelope["text"], format!("call-{}", i));
        }
    }
}
