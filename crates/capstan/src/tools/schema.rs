//! Argument schemas and validation.
//!
//! Every tool declares an [`ArgSchema`]: either a typed list of
//! [`FieldSpec`]s (the common case — defaults, enums, ranges, strict
//! unknown-field rejection) or a raw JSON Schema for plug-in tools that
//! bring their own contract. Validation produces a [`NormalizedArgs`] map
//! with defaults filled in; the pipeline aborts at the validation stage on
//! the first mismatch, reporting the offending field path.
//!
//! Normalization is idempotent: validating an already-normalized map
//! returns the same map. Hook-rewritten inputs are revalidated through the
//! same path, so a hook cannot smuggle an out-of-contract value past the
//! schema.

use crate::error::ToolError;
use serde_json::{Map, Value};
use std::fmt;

// ── NormalizedArgs ─────────────────────────────────────────────────

/// A validated, default-filled argument map.
///
/// Wraps the JSON object so downstream code gets typed accessors instead
/// of re-matching on `Value` everywhere.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct NormalizedArgs(Map<String, Value>);

impl NormalizedArgs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn string_list(&self, key: &str) -> Option<Vec<&str>> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// The underlying JSON object (for hashing, hook payloads, signatures).
    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for NormalizedArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ── FieldSpec ──────────────────────────────────────────────────────

/// Permitted argument kinds. Compound values beyond these use a raw
/// JSON-Schema contract instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
    Object,
}

impl ArgKind {
    fn json_type(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::StringList => "array",
            ArgKind::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Number => value.is_number(),
            ArgKind::Boolean => value.is_boolean(),
            ArgKind::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            ArgKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::StringList => f.write_str("array of strings"),
            other => f.write_str(other.json_type()),
        }
    }
}

/// One argument's contract: kind, requiredness, default, enum, range.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ArgKind,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl FieldSpec {
    fn new(name: &str, kind: ArgKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: String::new(),
            required: false,
            default: None,
            enum_values: None,
            minimum: None,
            maximum: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, ArgKind::String)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, ArgKind::Integer)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, ArgKind::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ArgKind::Boolean)
    }

    pub fn string_list(name: &str) -> Self {
        Self::new(name, ArgKind::StringList)
    }

    pub fn object(name: &str) -> Self {
        Self::new(name, ArgKind::Object)
    }

    /// Mark the field required (builder pattern).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Default for an omitted optional field. Must match the field's kind.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Restrict the field to a closed set of values.
    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Inclusive numeric range.
    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    /// Check `value` against this spec. Returns the failing reason.
    fn check(&self, value: &Value) -> Result<(), String> {
        if !self.kind.matches(value) {
            return Err(format!("expected {}, got {}", self.kind, type_name(value)));
        }
        if let Some(ref allowed) = self.enum_values
            && !allowed.contains(value)
        {
            let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(format!("must be one of [{}]", rendered.join(", ")));
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum
                && n < min
            {
                return Err(format!("must be >= {min}"));
            }
            if let Some(max) = self.maximum
                && n > max
            {
                return Err(format!("must be <= {max}"));
            }
        }
        Ok(())
    }
}

/// Human name for a JSON value's type, for error messages.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── ArgSchema ──────────────────────────────────────────────────────

/// A tool's argument contract.
#[derive(Clone, Debug)]
pub enum ArgSchema {
    /// Typed per-field contract with strict unknown-field rejection.
    Fields(Vec<FieldSpec>),
    /// A raw JSON Schema supplied by a plug-in tool. Validated through the
    /// `jsonschema` crate; no defaults are applied.
    Raw(Value),
}

impl ArgSchema {
    /// An object schema with the given fields.
    pub fn object(fields: Vec<FieldSpec>) -> Self {
        ArgSchema::Fields(fields)
    }

    /// A schema with no arguments at all.
    pub fn empty() -> Self {
        ArgSchema::Fields(Vec::new())
    }

    pub fn raw(schema: Value) -> Self {
        ArgSchema::Raw(schema)
    }

    /// Validate and normalize `args`.
    ///
    /// For [`ArgSchema::Fields`]: rejects non-objects and unknown fields,
    /// fills defaults, checks kind/enum/range per field. For
    /// [`ArgSchema::Raw`]: validates against the JSON Schema and passes the
    /// object through unchanged.
    pub fn validate(&self, args: &Value) -> Result<NormalizedArgs, ToolError> {
        let object = args.as_object().ok_or_else(|| {
            ToolError::validation("(root)", format!("expected object, got {}", type_name(args)))
        })?;

        match self {
            ArgSchema::Fields(fields) => {
                for key in object.keys() {
                    if !fields.iter().any(|f| f.name == *key) {
                        return Err(ToolError::validation(key, "unknown field"));
                    }
                }

                let mut normalized = Map::new();
                for field in fields {
                    match object.get(&field.name) {
                        Some(value) => {
                            field
                                .check(value)
                                .map_err(|reason| ToolError::validation(&field.name, reason))?;
                            normalized.insert(field.name.clone(), value.clone());
                        }
                        None if field.required => {
                            return Err(ToolError::validation(&field.name, "missing required field"));
                        }
                        None => {
                            if let Some(ref default) = field.default {
                                normalized.insert(field.name.clone(), default.clone());
                            }
                        }
                    }
                }
                Ok(NormalizedArgs(normalized))
            }
            ArgSchema::Raw(schema) => {
                // An uncompilable schema skips validation rather than
                // failing every call against it.
                let validator = match jsonschema::validator_for(schema) {
                    Ok(v) => v,
                    Err(_) => return Ok(NormalizedArgs(object.clone())),
                };
                let errors: Vec<String> = validator
                    .iter_errors(args)
                    .map(|e| format!("{}: {e}", e.instance_path()))
                    .collect();
                if let Some(first) = errors.first() {
                    let (path, reason) = first.split_once(": ").unwrap_or(("(root)", first));
                    let path = if path.is_empty() { "(root)" } else { path };
                    return Err(ToolError::validation(path, reason)
                        .with_details(serde_json::json!({ "errors": errors })));
                }
                Ok(NormalizedArgs(object.clone()))
            }
        }
    }

    /// Render the contract as a JSON Schema for the tool-call surface.
    pub fn to_json_schema(&self) -> Value {
        match self {
            ArgSchema::Raw(schema) => schema.clone(),
            ArgSchema::Fields(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    let mut prop = Map::new();
                    prop.insert("type".into(), Value::String(field.kind.json_type().into()));
                    if field.kind == ArgKind::StringList {
                        prop.insert("items".into(), serde_json::json!({ "type": "string" }));
                    }
                    if !field.description.is_empty() {
                        prop.insert("description".into(), Value::String(field.description.clone()));
                    }
                    if let Some(ref values) = field.enum_values {
                        prop.insert("enum".into(), Value::Array(values.clone()));
                    }
                    if let Some(default) = field.default.clone() {
                        prop.insert("default".into(), default);
                    }
                    if let Some(min) = field.minimum {
                        prop.insert("minimum".into(), serde_json::json!(min));
                    }
                    if let Some(max) = field.maximum {
                        prop.insert("maximum".into(), serde_json::json!(max));
                    }
                    properties.insert(field.name.clone(), Value::Object(prop));
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                })
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn read_schema() -> ArgSchema {
        ArgSchema::object(vec![
            FieldSpec::string("file_path").required().describe("Path to read"),
            FieldSpec::integer("limit")
                .default_value(json!(2000))
                .range(1.0, 100_000.0),
            FieldSpec::boolean("raw").default_value(json!(false)),
        ])
    }

    #[test]
    fn fills_defaults_for_omitted_optionals() {
        let args = read_schema()
            .validate(&json!({ "file_path": "/ws/a.txt" }))
            .unwrap();
        assert_eq!(args.str("file_path"), Some("/ws/a.txt"));
        assert_eq!(args.int("limit"), Some(2000));
        assert_eq!(args.bool("raw"), Some(false));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = read_schema()
            .validate(&json!({ "file_path": "/ws/a.txt", "offst": 3 }))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert!(err.message.contains("offst"));
        assert!(err.message.contains("unknown field"));
    }

    #[test]
    fn rejects_missing_required() {
        let err = read_schema().validate(&json!({})).unwrap_err();
        assert!(err.message.contains("file_path"));
        assert!(err.message.contains("missing required"));
    }

    #[test]
    fn rejects_wrong_type_with_both_names() {
        let err = read_schema()
            .validate(&json!({ "file_path": 42 }))
            .unwrap_err();
        assert!(err.message.contains("expected string, got number"));
    }

    #[test]
    fn rejects_non_object_root() {
        let err = read_schema().validate(&json!("not an object")).unwrap_err();
        assert!(err.message.contains("(root)"));
    }

    #[test]
    fn enforces_enum_membership() {
        let schema = ArgSchema::object(vec![
            FieldSpec::string("mode")
                .required()
                .one_of(vec![json!("fast"), json!("safe")]),
        ]);
        assert!(schema.validate(&json!({ "mode": "fast" })).is_ok());
        let err = schema.validate(&json!({ "mode": "reckless" })).unwrap_err();
        assert!(err.message.contains("one of"));
    }

    #[test]
    fn enforces_numeric_range() {
        let err = read_schema()
            .validate(&json!({ "file_path": "x", "limit": 0 }))
            .unwrap_err();
        assert!(err.message.contains(">= 1"));
        let err = read_schema()
            .validate(&json!({ "file_path": "x", "limit": 200_000 }))
            .unwrap_err();
        assert!(err.message.contains("<= 100000"));
    }

    #[test]
    fn integer_kind_rejects_floats() {
        let err = read_schema()
            .validate(&json!({ "file_path": "x", "limit": 2.5 }))
            .unwrap_err();
        assert!(err.message.contains("expected integer"));
    }

    #[test]
    fn string_list_checks_element_types() {
        let schema =
            ArgSchema::object(vec![FieldSpec::string_list("globs").required()]);
        assert!(schema.validate(&json!({ "globs": ["*.rs", "*.toml"] })).is_ok());
        let err = schema.validate(&json!({ "globs": ["*.rs", 7] })).unwrap_err();
        assert!(err.message.contains("expected array of strings"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let schema = read_schema();
        let once = schema.validate(&json!({ "file_path": "/ws/a.txt" })).unwrap();
        let twice = schema.validate(&once.as_value()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn raw_schema_validates_through_jsonschema() {
        let schema = ArgSchema::raw(json!({
            "type": "object",
            "properties": { "count": { "type": "integer" } },
            "required": ["count"],
        }));
        assert!(schema.validate(&json!({ "count": 3 })).is_ok());
        let err = schema.validate(&json!({ "count": "three" })).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert!(err.details.is_some());
    }

    #[test]
    fn raw_schema_passes_object_through_unchanged() {
        let schema = ArgSchema::raw(json!({ "type": "object" }));
        let args = schema
            .validate(&json!({ "anything": ["goes", 1, true] }))
            .unwrap();
        assert_eq!(args.as_value(), json!({ "anything": ["goes", 1, true] }));
    }

    #[test]
    fn json_schema_rendering_includes_constraints() {
        let rendered = read_schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["additionalProperties"], false);
        assert_eq!(rendered["properties"]["file_path"]["type"], "string");
        assert_eq!(rendered["properties"]["limit"]["default"], 2000);
        assert_eq!(rendered["properties"]["limit"]["minimum"], 1.0);
        assert_eq!(rendered["required"], json!(["file_path"]));
    }

    #[test]
    fn typed_getters() {
        let schema = ArgSchema::object(vec![
            FieldSpec::string("name").required(),
            FieldSpec::number("ratio").required(),
            FieldSpec::string_list("tags").required(),
        ]);
        let args = schema
            .validate(&json!({ "name": "x", "ratio": 0.5, "tags": ["a", "b"] }))
            .unwrap();
        assert_eq!(args.str("name"), Some("x"));
        assert_eq!(args.number("ratio"), Some(0.5));
        assert_eq!(args.string_list("tags").unwrap(), vec!["a", "b"]);
        assert!(args.get("missing").is_none());
    }
}
