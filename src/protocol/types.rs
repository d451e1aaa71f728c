// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP message payloads and typed tool schemas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// Handshake
// ============================================================================

/// Name and version of a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

// ============================================================================
// Tools
// ============================================================================

/// JSON type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl PropertyType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Schema of a single tool argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    /// Element schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    fn of(property_type: PropertyType, description: impl Into<String>) -> Self {
        Self {
            property_type,
            description: description.into(),
            default: None,
            allowed: None,
            minimum: None,
            maximum: None,
            items: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::of(PropertyType::String, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::of(PropertyType::Integer, description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::of(PropertyType::Object, description)
    }

    pub fn array_of(items: PropertySchema, description: impl Into<String>) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(PropertyType::Array, description)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    /// Check one value against this schema. `name` is used in the error message.
    pub fn check(&self, name: &str, value: &Value) -> Result<(), String> {
        if !self.property_type.matches(value) {
            return Err(format!(
                "Argument '{}' must be of type {}",
                name,
                self.property_type.name()
            ));
        }

        if let (Some(allowed), Some(s)) = (&self.allowed, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(format!(
                    "Argument '{}' must be one of: {}",
                    name,
                    allowed.join(", ")
                ));
            }
        }

        if let Some(n) = value.as_i64() {
            let below = self.minimum.map_or(false, |min| n < min);
            let above = self.maximum.map_or(false, |max| n > max);
            if below || above {
                return Err(format!(
                    "Argument '{}' must be between {} and {}",
                    name,
                    self.minimum.unwrap_or(i64::MIN),
                    self.maximum.unwrap_or(i64::MAX)
                ));
            }
        }

        if let (Some(items), Some(elements)) = (&self.items, value.as_array()) {
            for (i, element) in elements.iter().enumerate() {
                items.check(&format!("{}[{}]", name, i), element)?;
            }
        }

        Ok(())
    }
}

/// Input schema of a tool: always a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Validate call arguments. Required strings must also be non-empty.
    ///
    /// Unknown arguments are ignored.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        for name in &self.required {
            match arguments.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("Missing required argument: {}", name))
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(format!("Missing required argument: {}", name))
                }
                Some(_) => {}
            }
        }

        for (name, value) in arguments {
            if value.is_null() {
                continue;
            }
            if let Some(schema) = self.properties.get(name) {
                schema.check(name, value)?;
            }
        }
        Ok(())
    }
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// A callable tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: ToolSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Content returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Pretty-printed JSON payload as text content.
    pub fn json(value: &impl Serialize) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(format!("Failed to serialize result: {}", e)),
        }
    }

    /// A soft failure: a successful RPC response flagged `isError`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// All text content joined by newlines.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ToolSchema {
        ToolSchema::new()
            .with_required("projectPath", PropertySchema::string("Project"))
            .with_property(
                "priority",
                PropertySchema::integer("Priority").with_range(1, 3).with_default(2),
            )
            .with_property(
                "status",
                PropertySchema::string("Status").with_enum(["pending", "running"]),
            )
            .with_property(
                "args",
                PropertySchema::array_of(PropertySchema::string("Arg"), "Args"),
            )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_accepts_valid_arguments() {
        let arguments = args(json!({
            "projectPath": "/repo",
            "priority": 3,
            "status": "running",
            "args": ["a", "b"],
            "extra": true
        }));
        assert!(schema().validate(&arguments).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_and_empty_required() {
        let err = schema().validate(&Map::new()).unwrap_err();
        assert_eq!(err, "Missing required argument: projectPath");

        let err = schema()
            .validate(&args(json!({"projectPath": "  "})))
            .unwrap_err();
        assert!(err.contains("projectPath"));
    }

    #[test]
    fn test_validate_checks_types_enums_and_bounds() {
        let base = |extra: Value| {
            let mut map = args(json!({"projectPath": "/repo"}));
            map.extend(args(extra));
            schema().validate(&map)
        };

        assert!(base(json!({"priority": "high"})).unwrap_err().contains("integer"));
        assert!(base(json!({"priority": 7})).unwrap_err().contains("between 1 and 3"));
        assert!(base(json!({"status": "paused"})).unwrap_err().contains("one of"));
        assert!(base(json!({"args": ["ok", 3]})).unwrap_err().contains("args[1]"));
    }

    #[test]
    fn test_schema_serializes_as_json_schema() {
        let json = serde_json::to_value(schema()).unwrap();
        assert_eq!(json["type"], "object");
        assert_eq!(json["required"], json!(["projectPath"]));
        assert_eq!(json["properties"]["priority"]["minimum"], 1);
        assert_eq!(json["properties"]["priority"]["default"], 2);
        assert_eq!(json["properties"]["status"]["enum"], json!(["pending", "running"]));
        assert_eq!(json["properties"]["args"]["items"]["type"], "string");
    }

    #[test]
    fn test_call_tool_result_shape() {
        let json = serde_json::to_value(CallToolResult::error("boom")).unwrap();
        assert_eq!(json, json!({"content": [{"type": "text", "text": "boom"}], "isError": true}));
    }
}
