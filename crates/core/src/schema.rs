//! Argument schemas for tool declarations.
//!
//! Flow documents describe function parameters with a small subset of JSON
//! schema. The same structure is sent back to the model as the tool's
//! `parameters` and is used to check tool-call payloads before any handler
//! runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Primitive kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl PropertyKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            PropertyKind::String => value.is_string(),
            PropertyKind::Number => value.is_number(),
            // Whole floats such as `3.0` count as integers.
            PropertyKind::Integer => {
                value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            PropertyKind::Boolean => value.is_boolean(),
            PropertyKind::Array => value.is_array(),
            PropertyKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PropertyKind::String => "string",
            PropertyKind::Number => "number",
            PropertyKind::Integer => "integer",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Array => "array",
            PropertyKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Schema of a single named property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values for string properties.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Element schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    /// Nested fields for objects.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl PropertySchema {
    pub fn of(kind: PropertyKind) -> Self {
        Self {
            kind,
            description: None,
            allowed: None,
            items: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    fn check(&self, path: &str, value: &Value) -> Result<(), SchemaViolation> {
        if !self.kind.matches(value) {
            return Err(SchemaViolation::WrongKind {
                path: path.to_string(),
                expected: self.kind,
                found: describe(value),
            });
        }
        if let (Some(allowed), Some(text)) = (&self.allowed, value.as_str()) {
            if !allowed.iter().any(|a| a == text) {
                return Err(SchemaViolation::NotAllowed {
                    path: path.to_string(),
                    value: text.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
        match value {
            Value::Array(elements) => {
                if let Some(items) = &self.items {
                    for (i, element) in elements.iter().enumerate() {
                        items.check(&format!("{path}[{i}]"), element)?;
                    }
                }
            }
            Value::Object(fields) => {
                check_fields(path, &self.properties, &self.required, fields)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    NotAnObject(String),
    MissingField(String),
    WrongKind {
        path: String,
        expected: PropertyKind,
        found: &'static str,
    },
    NotAllowed {
        path: String,
        value: String,
        allowed: Vec<String>,
    },
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaViolation::NotAnObject(found) => {
                write!(f, "arguments must be a JSON object, got {found}")
            }
            SchemaViolation::MissingField(path) => write!(f, "missing required field '{path}'"),
            SchemaViolation::WrongKind {
                path,
                expected,
                found,
            } => write!(f, "field '{path}' must be {expected}, got {found}"),
            SchemaViolation::NotAllowed {
                path,
                value,
                allowed,
            } => write!(
                f,
                "field '{path}' has value '{value}', expected one of [{}]",
                allowed.join(", ")
            ),
        }
    }
}

/// The top-level arguments object of a function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArgumentSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ArgumentSchema {
    /// Schema for a function that takes no arguments.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Parses raw tool-call arguments and checks them against the schema.
    ///
    /// Empty text and `null` are read as an empty object, since models omit
    /// arguments for parameterless functions.
    pub fn validate(&self, raw: &str) -> Result<Map<String, Value>, SchemaViolation> {
        let raw = raw.trim();
        let value = if raw.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str::<Value>(raw)
                .map_err(|e| SchemaViolation::NotAnObject(format!("malformed JSON ({e})")))?
        };
        let fields = match value {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => return Err(SchemaViolation::NotAnObject(describe(&other).to_string())),
        };
        check_fields("", &self.properties, &self.required, &fields)?;
        Ok(fields)
    }

    /// The JSON schema advertised to the model.
    pub fn to_json(&self) -> Value {
        let properties = serde_json::to_value(&self.properties).unwrap_or_default();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

fn check_fields(
    prefix: &str,
    properties: &BTreeMap<String, PropertySchema>,
    required: &[String],
    fields: &Map<String, Value>,
) -> Result<(), SchemaViolation> {
    let join = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        }
    };
    for name in required {
        if !fields.contains_key(name) {
            return Err(SchemaViolation::MissingField(join(name)));
        }
    }
    for (name, value) in fields {
        // Extra fields are tolerated; optional fields may be sent as null.
        if let Some(property) = properties.get(name) {
            if value.is_null() && !required.contains(name) {
                continue;
            }
            property.check(&join(name), value)?;
        }
    }
    Ok(())
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
