//! Schema layer - typed input and output contracts for tools.
//!
//! Parameter and output structs derive `JsonSchema`, which is what MCP
//! clients are shown, and `Validate`, which carries the value rules the
//! JSON Schema cannot express. An [`InputSchema`] turns untyped call
//! arguments into a validated parameter value and reports every violated
//! field at once. An [`OutputSchema`] checks the envelope a tool produced
//! before it is serialized with [`canonical_json`].
//!
//! ## Wire contract
//!
//! Every envelope is a JSON object carrying `success: bool`. Success
//! envelopes follow the tool's output struct; failure envelopes are a
//! [`Failure`]: `success: false` plus a string `error` and/or `message`.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use rmcp::handler::server::tool::schema_for_type;
use rmcp::model::JsonObject;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Key every envelope must carry.
pub const SUCCESS_FIELD: &str = "success";

/// Keys a failure envelope may carry.
const FAILURE_FIELDS: [&str; 3] = [SUCCESS_FIELD, "error", "message"];

/// Key validator uses for struct-level errors.
const STRUCT_LEVEL: &str = "__all__";

// ============================================================================
// Validation errors
// ============================================================================

/// A single field that failed validation and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Every violation found while validating one value.
///
/// Never empty: validation only produces this error when at least one field
/// is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_violations(.violations))]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    /// Build an error for a single field.
    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(vec![FieldViolation::new(field, reason)])
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    /// Whether any violation concerns the given field.
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// Flatten `validator` errors into field violations, nested fields as
    /// `results[0].name`. Struct-level errors land on the field named by
    /// their `field` parameter, or on `root`.
    pub fn from_validator(errors: &ValidationErrors, root: &str) -> Self {
        let mut violations = Vec::new();
        flatten_validator(errors, "", root, &mut violations);
        violations.sort_by(|a, b| a.field.cmp(&b.field));
        violations.dedup_by(|a, b| a.field == b.field);
        Self::new(violations)
    }
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A type whose derived JSON Schema could not be compiled.
#[derive(Debug, Clone, Error)]
#[error("schema for {type_name} cannot be compiled: {reason}")]
pub struct SchemaError {
    pub type_name: String,
    pub reason: String,
}

// ============================================================================
// Rule helpers for `#[validate(schema(function = ...))]`
// ============================================================================

/// Build a struct-level validation error attributed to `field`.
pub fn field_error(
    field: &'static str,
    code: &'static str,
    message: impl Into<Cow<'static, str>>,
) -> validator::ValidationError {
    let mut error = validator::ValidationError::new(code);
    error.message = Some(message.into());
    error.add_param(Cow::Borrowed("field"), &field);
    error
}

/// Reject empty and whitespace-only strings.
pub fn non_blank(field: &'static str, value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(field_error(
            field,
            "non_blank",
            "must not be empty or whitespace only",
        ));
    }
    Ok(())
}

/// Require a finite number strictly greater than zero.
pub fn strictly_positive(field: &'static str, value: f64) -> Result<(), validator::ValidationError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(field_error(
            field,
            "positive",
            format!("must be greater than 0, got {}", value),
        ));
    }
    Ok(())
}

fn flatten_validator(errors: &ValidationErrors, path: &str, root: &str, out: &mut Vec<FieldViolation>) {
    for (field, kind) in errors.errors() {
        let field = field.to_string();
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let target = if field == STRUCT_LEVEL {
                        match error.params.get("field").and_then(Value::as_str) {
                            Some(named) => join_path(path, named),
                            None if path.is_empty() => root.to_string(),
                            None => path.to_string(),
                        }
                    } else {
                        join_path(path, &field)
                    };
                    out.push(FieldViolation::new(target, describe_rule(error)));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                flatten_validator(inner, &join_path(path, &field), root, out);
            }
            ValidationErrorsKind::List(items) => {
                let base = join_path(path, &field);
                for (index, inner) in items {
                    flatten_validator(inner, &format!("{}[{}]", base, index), root, out);
                }
            }
        }
    }
}

fn describe_rule(error: &validator::ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }
    let param = |key: &str| error.params.get(key).map(Value::to_string);
    match (error.code.as_ref(), param("min"), param("max")) {
        ("length", Some(min), Some(max)) => format!("length must be between {} and {}", min, max),
        ("length", Some(min), None) => format!("length must be at least {}", min),
        ("length", None, Some(max)) => format!("length must be at most {}", max),
        ("range", Some(min), Some(max)) => format!("must be between {} and {}", min, max),
        ("range", Some(min), None) => format!("must be >= {}", min),
        ("range", None, Some(max)) => format!("must be <= {}", max),
        ("required", _, _) => "field required".to_string(),
        (code, _, _) => format!("failed '{}' check", code),
    }
}

// ============================================================================
// Shape checks against the derived JSON Schema
// ============================================================================

fn compile<T>(schema: &JsonObject) -> Result<Arc<jsonschema::Validator>, SchemaError> {
    jsonschema::validator_for(&Value::Object(schema.clone()))
        .map(Arc::new)
        .map_err(|e| SchemaError {
            type_name: std::any::type_name::<T>().to_string(),
            reason: e.to_string(),
        })
}

fn join_path(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

/// `/atoms_dict/positions/0` → `atoms_dict.positions[0]`.
fn pointer_to_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').filter(|s| !s.is_empty()) {
        if segment.parse::<usize>().is_ok() {
            path.push_str(&format!("[{}]", segment));
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(segment);
        }
    }
    path
}

fn shape_violations(validator: &jsonschema::Validator, instance: &Value, root: &str) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    for error in validator.iter_errors(instance) {
        let path = pointer_to_path(&error.instance_path.to_string());
        match &error.kind {
            ValidationErrorKind::Required { property } => {
                let name = property
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| property.to_string());
                violations.push(FieldViolation::new(join_path(&path, &name), "field required"));
            }
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                for name in unexpected {
                    violations.push(FieldViolation::new(join_path(&path, name), "unknown field"));
                }
            }
            _ => {
                let field = if path.is_empty() { root.to_string() } else { path };
                violations.push(FieldViolation::new(field, error.to_string()));
            }
        }
    }
    violations
}

/// Add violations for fields not already reported.
fn merge(into: &mut Vec<FieldViolation>, more: Vec<FieldViolation>) {
    for violation in more {
        if !into.iter().any(|v| v.field == violation.field) {
            into.push(violation);
        }
    }
}

/// `null` object members mean "absent" throughout the wire contract.
fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn declared_type(property: &Value) -> Option<&str> {
    match property.get("type")? {
        Value::String(kind) => Some(kind),
        Value::Array(kinds) => kinds.iter().filter_map(Value::as_str).find(|k| *k != "null"),
        _ => None,
    }
}

/// Lenient scalar coercion for call arguments: numeric strings, integral
/// floats and `"true"`/`"false"`. Anything else is left for the shape check
/// to report.
fn coerce_argument(kind: &str, value: &mut Value) {
    let coerced = match (kind, &*value) {
        ("integer", Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        ("integer", Value::Number(n)) if !(n.is_i64() || n.is_u64()) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::from),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    if let Some(coerced) = coerced {
        *value = coerced;
    }
}

// ============================================================================
// Input schema
// ============================================================================

/// Typed arguments of one tool.
pub trait ToolParams:
    DeserializeOwned + Serialize + JsonSchema + Validate + Send + 'static
{
    /// Adjust deserialized values (trimming, case folding) before the value
    /// rules run.
    fn normalize(&mut self) {}
}

/// What to do with argument names the schema does not declare.
///
/// Follows the parameter struct: `#[serde(deny_unknown_fields)]` rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFields {
    /// Report each undeclared argument as a violation.
    Reject,
    /// Drop undeclared arguments silently.
    Ignore,
}

enum TypedFailure {
    /// The arguments could not be read into the parameter struct.
    Decode(String),
    Invalid(ValidationError),
}

type InputCheck = fn(Map<String, Value>) -> Result<Map<String, Value>, TypedFailure>;

fn check_params<T: ToolParams>(values: Map<String, Value>) -> Result<Map<String, Value>, TypedFailure> {
    let mut params: T =
        serde_json::from_value(Value::Object(values)).map_err(|e| TypedFailure::Decode(e.to_string()))?;
    params.normalize();
    params
        .validate()
        .map_err(|e| TypedFailure::Invalid(ValidationError::from_validator(&e, "arguments")))?;
    match serde_json::to_value(&params) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TypedFailure::Decode(format!(
            "parameters encode to {}",
            type_name(&other)
        ))),
        Err(e) => Err(TypedFailure::Decode(e.to_string())),
    }
}

/// Strict shape for the arguments of one tool.
#[derive(Clone)]
pub struct InputSchema {
    schema: Arc<JsonObject>,
    validator: Arc<jsonschema::Validator>,
    unknown_fields: UnknownFields,
    check: InputCheck,
}

impl fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSchema")
            .field("schema", &self.schema)
            .field("unknown_fields", &self.unknown_fields)
            .finish_non_exhaustive()
    }
}

impl InputSchema {
    /// Derive the schema of a parameter struct.
    pub fn of<T: ToolParams>() -> Result<Self, SchemaError> {
        let schema = schema_for_type::<T>();
        let validator = compile::<T>(&schema)?;
        let unknown_fields = match schema.get("additionalProperties") {
            Some(Value::Bool(false)) => UnknownFields::Reject,
            _ => UnknownFields::Ignore,
        };
        Ok(Self {
            schema: schema.into(),
            validator,
            unknown_fields,
            check: check_params::<T>,
        })
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    /// JSON Schema object advertised to MCP clients.
    pub fn json_schema(&self) -> Arc<JsonObject> {
        self.schema.clone()
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }

    fn declares(&self, name: &str) -> bool {
        self.properties().is_some_and(|p| p.contains_key(name))
    }

    /// Validate and coerce raw call arguments.
    ///
    /// `null` is accepted as "no arguments". Any other non-object value is a
    /// violation on the pseudo-field `arguments`. Shape violations (types,
    /// missing or unknown fields, declared bounds) and value rules are
    /// reported together; a value rule on a field that already has a shape
    /// violation is not repeated.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedInput, ValidationError> {
        let mut args = match raw {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ValidationError::single(
                    "arguments",
                    format!("expected an object of named arguments, got {}", type_name(other)),
                ));
            }
        };

        if self.unknown_fields == UnknownFields::Ignore {
            args.retain(|key, _| self.declares(key));
        }
        if let Some(properties) = self.properties() {
            for (name, value) in args.iter_mut() {
                if let Some(kind) = properties.get(name).and_then(declared_type) {
                    coerce_argument(kind, value);
                }
            }
        }
        let mut args = Value::Object(args);
        drop_nulls(&mut args);

        let mut violations = shape_violations(&self.validator, &args, "arguments");

        let mut declared = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        declared.retain(|key, _| self.declares(key));

        match (self.check)(declared) {
            Ok(values) if violations.is_empty() => return Ok(ValidatedInput { values }),
            Ok(_) => {}
            Err(TypedFailure::Invalid(invalid)) => merge(&mut violations, invalid.violations),
            Err(TypedFailure::Decode(reason)) => {
                if violations.is_empty() {
                    violations.push(FieldViolation::new("arguments", reason));
                }
            }
        }

        Err(ValidationError::new(violations))
    }
}

/// Arguments that passed an [`InputSchema`], normalized and with defaults
/// filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedInput {
    values: Map<String, Value>,
}

impl ValidatedInput {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Deserialize the validated arguments into a typed parameter struct.
    pub fn into_params<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.values))
    }
}

// ============================================================================
// Output schema
// ============================================================================

/// Envelope a tool returns when it ran but could not produce a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl Failure {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: message.into(),
        }
    }
}

type OutputCheck = fn(Value) -> Result<Value, TypedFailure>;

fn check_output<T>(value: Value) -> Result<Value, TypedFailure>
where
    T: DeserializeOwned + Serialize + Validate,
{
    let output: T = serde_json::from_value(value).map_err(|e| TypedFailure::Decode(e.to_string()))?;
    output
        .validate()
        .map_err(|e| TypedFailure::Invalid(ValidationError::from_validator(&e, "envelope")))?;
    serde_json::to_value(&output).map_err(|e| TypedFailure::Decode(e.to_string()))
}

/// Strict shape for the envelope one tool returns.
///
/// Success envelopes must match the output struct exactly; failure envelopes
/// must be a [`Failure`].
#[derive(Clone)]
pub struct OutputSchema {
    schema: Arc<JsonObject>,
    validator: Arc<jsonschema::Validator>,
    check: OutputCheck,
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl OutputSchema {
    /// Derive the schema of a success envelope struct.
    pub fn of<T>() -> Result<Self, SchemaError>
    where
        T: DeserializeOwned + Serialize + JsonSchema + Validate + 'static,
    {
        let schema = schema_for_type::<T>();
        let validator = compile::<T>(&schema)?;
        Ok(Self {
            schema: schema.into(),
            validator,
            check: check_output::<T>,
        })
    }

    /// JSON Schema object of the success envelope, advertised to MCP clients.
    pub fn json_schema(&self) -> Arc<JsonObject> {
        self.schema.clone()
    }

    /// Check an envelope produced by a tool and normalize it.
    pub fn validate(&self, value: Value) -> Result<Value, ValidationError> {
        let mut value = value;
        drop_nulls(&mut value);
        let Value::Object(envelope) = value else {
            return Err(ValidationError::single(
                "envelope",
                format!("expected a JSON object, got {}", type_name(&value)),
            ));
        };

        match envelope.get(SUCCESS_FIELD) {
            Some(Value::Bool(true)) => self.validate_success(Value::Object(envelope)),
            Some(Value::Bool(false)) => validate_failure(envelope),
            Some(other) => Err(ValidationError::single(
                SUCCESS_FIELD,
                format!("expected boolean, got {}", type_name(other)),
            )),
            None => Err(ValidationError::single(SUCCESS_FIELD, "field required")),
        }
    }

    fn validate_success(&self, envelope: Value) -> Result<Value, ValidationError> {
        let mut violations = shape_violations(&self.validator, &envelope, "envelope");
        match (self.check)(envelope) {
            Ok(normalized) if violations.is_empty() => return Ok(normalized),
            Ok(_) => {}
            Err(TypedFailure::Invalid(invalid)) => merge(&mut violations, invalid.violations),
            Err(TypedFailure::Decode(reason)) => {
                if violations.is_empty() {
                    violations.push(FieldViolation::new("envelope", reason));
                }
            }
        }
        Err(ValidationError::new(violations))
    }
}

fn validate_failure(envelope: Map<String, Value>) -> Result<Value, ValidationError> {
    let mut violations = Vec::new();

    for (key, value) in &envelope {
        if !FAILURE_FIELDS.contains(&key.as_str()) {
            violations.push(FieldViolation::new(key, "undeclared field in a failure envelope"));
        } else if key != SUCCESS_FIELD && !value.is_string() {
            violations.push(FieldViolation::new(
                key,
                format!("expected string, got {}", type_name(value)),
            ));
        }
    }

    let carries_text = |key: &str| matches!(envelope.get(key), Some(Value::String(s)) if !s.is_empty());
    if !carries_text("error") && !carries_text("message") {
        violations.push(FieldViolation::new(
            "error",
            "failure envelope must carry an error or message",
        ));
    }

    if violations.is_empty() {
        Ok(Value::Object(envelope))
    } else {
        Err(ValidationError::new(violations))
    }
}

// ============================================================================
// Canonical serialization
// ============================================================================

/// Serialize a value with recursively sorted keys and two-space indentation.
///
/// Identical values always produce byte-identical text.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string_pretty(&Canonical(value)).unwrap_or_else(|_| {
        // Only reachable if a custom serializer fails; Value itself cannot.
        String::from("{\n  \"error\": \"internal_error\",\n  \"success\": false\n}")
    })
}

struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &Canonical(value))?;
                }
                out.end()
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            other => other.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
    #[serde(deny_unknown_fields)]
    struct QueryParams {
        /// Search text.
        #[validate(length(min = 1, max = 200))]
        query: String,
        #[serde(default = "default_limit")]
        #[validate(range(min = 1, max = 100))]
        limit: i64,
        #[serde(default)]
        verbose: bool,
    }

    fn default_limit() -> i64 {
        10
    }

    impl ToolParams for QueryParams {
        fn normalize(&mut self) {
            self.query = self.query.trim().to_string();
        }
    }

    #[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
    struct LooseParams {
        name: String,
    }

    impl ToolParams for LooseParams {}

    #[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
    #[serde(deny_unknown_fields)]
    struct Item {
        #[validate(length(min = 1))]
        label: String,
    }

    #[derive(Debug, Deserialize, Serialize, JsonSchema, Validate)]
    #[serde(deny_unknown_fields)]
    #[validate(schema(function = "count_matches_items", skip_on_field_errors = false))]
    struct ListOutput {
        success: bool,
        #[validate(nested)]
        items: Vec<Item>,
        count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    }

    fn count_matches_items(output: &ListOutput) -> Result<(), validator::ValidationError> {
        if output.count != output.items.len() {
            return Err(field_error("count", "count_mismatch", "must equal the number of items"));
        }
        Ok(())
    }

    fn query_schema() -> InputSchema {
        InputSchema::of::<QueryParams>().unwrap()
    }

    fn list_schema() -> OutputSchema {
        OutputSchema::of::<ListOutput>().unwrap()
    }

    #[test]
    fn test_input_normalizes_and_fills_defaults() {
        let input = query_schema()
            .validate(&json!({ "query": "  MOF-5  " }))
            .unwrap();
        assert_eq!(input.str("query"), Some("MOF-5"));
        assert_eq!(input.get("limit"), Some(&json!(10)));
        assert_eq!(input.get("verbose"), Some(&json!(false)));
    }

    #[test]
    fn test_input_reports_every_violation() {
        let err = query_schema()
            .validate(&json!({ "query": "   ", "limit": 500, "extra": true }))
            .unwrap_err();
        assert_eq!(err.violations().len(), 3);
        assert!(err.mentions("query"));
        assert!(err.mentions("limit"));
        assert!(err.mentions("extra"));
    }

    #[test]
    fn test_input_missing_required_field() {
        let err = query_schema().validate(&json!({})).unwrap_err();
        assert_eq!(
            err.violations(),
            &[FieldViolation::new("query", "field required")]
        );
    }

    #[test]
    fn test_input_wrong_types_are_field_violations() {
        let err = query_schema()
            .validate(&json!({ "query": 42, "verbose": [] }))
            .unwrap_err();
        assert!(err.mentions("query"));
        assert!(err.mentions("verbose"));
        assert!(!err.mentions("arguments"));
    }

    #[test]
    fn test_input_max_length_counts_characters() {
        let schema = query_schema();
        assert!(schema.validate(&json!({ "query": "é".repeat(200) })).is_ok());
        let err = schema
            .validate(&json!({ "query": "a".repeat(201) }))
            .unwrap_err();
        assert!(err.mentions("query"));
    }

    #[test]
    fn test_input_null_arguments_mean_empty() {
        let err = query_schema().validate(&Value::Null).unwrap_err();
        assert!(err.mentions("query"));
        let input = query_schema()
            .validate(&json!({ "query": "UiO", "limit": null }))
            .unwrap();
        assert_eq!(input.get("limit"), Some(&json!(10)));
    }

    #[test]
    fn test_input_non_object_arguments() {
        let err = query_schema().validate(&json!(["MOF-5"])).unwrap_err();
        assert!(err.mentions("arguments"));
    }

    #[test]
    fn test_unknown_field_policy_follows_params() {
        assert_eq!(query_schema().unknown_fields(), UnknownFields::Reject);

        let loose = InputSchema::of::<LooseParams>().unwrap();
        assert_eq!(loose.unknown_fields(), UnknownFields::Ignore);
        let input = loose
            .validate(&json!({ "name": "UiO", "unexpected": 1 }))
            .unwrap();
        assert!(input.get("unexpected").is_none());
    }

    #[test]
    fn test_lenient_coercion() {
        let input = query_schema()
            .validate(&json!({ "query": "x", "limit": "20", "verbose": "TRUE" }))
            .unwrap();
        assert_eq!(input.get("limit"), Some(&json!(20)));
        assert_eq!(input.get("verbose"), Some(&json!(true)));

        let input = query_schema()
            .validate(&json!({ "query": "x", "limit": 3.0 }))
            .unwrap();
        assert_eq!(input.get("limit"), Some(&json!(3)));

        let err = query_schema()
            .validate(&json!({ "query": "x", "limit": 2.5 }))
            .unwrap_err();
        assert!(err.mentions("limit"));
    }

    #[test]
    fn test_into_params() {
        let params: QueryParams = query_schema()
            .validate(&json!({ "query": " HKUST " }))
            .unwrap()
            .into_params()
            .unwrap();
        assert_eq!(params.query, "HKUST");
        assert_eq!(params.limit, 10);
    }

    #[test]
    fn test_output_success_must_match_struct() {
        let err = list_schema()
            .validate(json!({ "success": true, "count": 1 }))
            .unwrap_err();
        assert!(err.mentions("items"));
    }

    #[test]
    fn test_output_checks_nested_entries_and_count() {
        let err = list_schema()
            .validate(json!({ "success": true, "count": 7, "items": [{ "bogus": 1 }, 3] }))
            .unwrap_err();
        assert!(err.violations().iter().any(|v| v.field.starts_with("items[0]")));
        assert!(err.mentions("items[1]"));

        let err = list_schema()
            .validate(json!({ "success": true, "count": 2, "items": [{ "label": "a" }] }))
            .unwrap_err();
        assert_eq!(err.violations(), &[FieldViolation::new("count", "must equal the number of items")]);

        let err = list_schema()
            .validate(json!({ "success": true, "count": 1, "items": [{ "label": "" }] }))
            .unwrap_err();
        assert!(err.mentions("items[0].label"));

        let value = list_schema()
            .validate(json!({ "success": true, "count": 1, "items": [{ "label": "a" }], "message": null }))
            .unwrap();
        assert_eq!(value, json!({ "success": true, "count": 1, "items": [{ "label": "a" }] }));
    }

    #[test]
    fn test_output_failure_envelope() {
        let schema = list_schema();
        let failure = serde_json::to_value(Failure::new("bad CIF", "Parsing error: bad CIF")).unwrap();
        assert!(schema.validate(failure).is_ok());
        assert!(
            schema
                .validate(json!({ "success": false, "message": "Parse error" }))
                .is_ok()
        );

        let err = schema.validate(json!({ "success": false })).unwrap_err();
        assert!(err.mentions("error"));

        let err = schema
            .validate(json!({ "success": false, "message": "x", "count": 0 }))
            .unwrap_err();
        assert!(err.mentions("count"));
    }

    #[test]
    fn test_output_is_strict() {
        let err = list_schema()
            .validate(json!({ "success": "yes", "count": "1", "items": [] }))
            .unwrap_err();
        assert!(err.mentions("success"));

        let err = list_schema()
            .validate(json!({ "success": true, "count": "1", "items": [], "rogue": 1 }))
            .unwrap_err();
        assert!(err.mentions("count"));
        assert!(err.mentions("rogue"));
    }

    #[test]
    fn test_canonical_json_is_sorted_and_indented() {
        let value = json!({ "success": true, "b": { "z": 1, "a": [ { "y": 2, "x": 1 } ] }, "a": null });
        let text = canonical_json(&value);
        assert_eq!(
            text,
            "{\n  \"a\": null,\n  \"b\": {\n    \"a\": [\n      {\n        \"x\": 1,\n        \"y\": 2\n      }\n    ],\n    \"z\": 1\n  },\n  \"success\": true\n}"
        );
    }

    #[test]
    fn test_json_schema_is_derived_from_params() {
        let schema = query_schema().json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["query"]["maxLength"], json!(200));
        assert_eq!(schema["properties"]["limit"]["default"], json!(10));
    }

    #[test]
    fn test_validator_paths_are_flattened() {
        let output = ListOutput {
            success: true,
            items: vec![Item { label: "ok".into() }, Item { label: String::new() }],
            count: 5,
            message: None,
        };
        let err = ValidationError::from_validator(&output.validate().unwrap_err(), "envelope");
        assert!(err.mentions("count"));
        assert!(err.mentions("items[1].label"));
    }
}
