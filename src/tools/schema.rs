//! Parameter definitions - typed source of each tool's input schema.
//!
//! Descriptors declare `ParamDef`s once; the JSON-schema-like `input_schema`
//! handed to the LLM runtime and the eager type checks done by the registry
//! both derive from them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

// =============================================================================
// Parameter types
// =============================================================================

/// Parameter type for tool inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Bool,
    StringList,
    /// Free-form JSON object (headers, query maps, bodies).
    Object,
    /// Any JSON value.
    Any,
    Enum(Vec<String>),
}

impl ParamType {
    /// Validate a JSON value against this parameter type. `null` is accepted
    /// everywhere and treated as absent.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            ParamType::String => expect(value.is_string(), "string", value),
            ParamType::Int => expect(
                value.is_i64() || value.is_u64() || is_numeric_string(value),
                "integer",
                value,
            ),
            ParamType::Bool => expect(value.is_boolean(), "boolean", value),
            ParamType::Object => expect(value.is_object(), "object", value),
            ParamType::Any => Ok(()),
            ParamType::StringList => {
                let Some(arr) = value.as_array() else {
                    return Err(format!("expected array, got {}", value_type_name(value)));
                };
                for (i, item) in arr.iter().enumerate() {
                    if !item.is_string() {
                        return Err(format!(
                            "expected string at index {}, got {}",
                            i,
                            value_type_name(item)
                        ));
                    }
                }
                Ok(())
            }
            ParamType::Enum(variants) => match value.as_str() {
                Some(s) if variants.iter().any(|v| v == s) => Ok(()),
                Some(s) => Err(format!(
                    "invalid enum value '{}', expected one of: {}",
                    s,
                    variants.join(", ")
                )),
                None => Err(format!(
                    "expected string for enum, got {}",
                    value_type_name(value)
                )),
            },
        }
    }

    /// JSON-schema fragment for this type.
    pub fn to_schema(&self) -> Value {
        match self {
            ParamType::String => json!({"type": "string"}),
            ParamType::Int => json!({"type": "integer"}),
            ParamType::Bool => json!({"type": "boolean"}),
            ParamType::StringList => json!({"type": "array", "items": {"type": "string"}}),
            ParamType::Object => json!({"type": "object"}),
            ParamType::Any => json!({}),
            ParamType::Enum(variants) => json!({"type": "string", "enum": variants}),
        }
    }

    /// Human-readable type name for prompt generation.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::StringList => "string[]".to_string(),
            ParamType::Object => "object".to_string(),
            ParamType::Any => "any".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
        }
    }
}

fn expect(ok: bool, wanted: &str, value: &Value) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(format!("expected {}, got {}", wanted, value_type_name(value)))
    }
}

// LLM runtimes frequently send ids and page numbers as strings.
fn is_numeric_string(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| !s.trim().is_empty() && s.trim().parse::<i64>().is_ok())
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamDef {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: false,
        }
    }
}

/// Build the JSON-schema-like object for a parameter list.
pub fn input_schema(params: &[ParamDef]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        let mut schema = param.param_type.to_schema();
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("description".to_string(), Value::String(param.description.clone()));
        }
        properties.insert(param.name.clone(), schema);
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Type-check the arguments that are present.
///
/// Unknown keys are ignored and missing required keys are not reported here:
/// handlers raise their own specific codes for those. Returns a list of
/// validation errors (empty = valid).
pub fn check_types(params: &[ParamDef], args: &Map<String, Value>) -> Vec<String> {
    params
        .iter()
        .filter_map(|def| {
            let value = args.get(&def.name)?;
            def.param_type
                .validate(value)
                .err()
                .map(|e| format!("Parameter '{}': {}", def.name, e))
        })
        .collect()
}

/// Format: `- tool_name(param1: type, param2?: type): description`
pub fn prompt_line(name: &str, description: &str, params: &[ParamDef]) -> String {
    let rendered: Vec<String> = params
        .iter()
        .map(|p| {
            let optional = if p.required { "" } else { "?" };
            format!("{}{}: {}", p.name, optional, p.param_type.display_name())
        })
        .collect();
    format!("- {}({}): {}", name, rendered.join(", "), description)
}
