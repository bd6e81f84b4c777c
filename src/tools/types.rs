//! JSON Schema parameter definitions for tools.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// JSON Schema-based parameter definition for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToolParameters {
    /// JSON Schema object describing the parameters.
    pub schema: serde_json::Value,
}

impl AgentToolParameters {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// Create an empty parameter schema (no parameters).
    pub fn empty() -> Self {
        Self::object().build()
    }

    /// Builder: create an object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Names of required properties, in declaration order.
    pub fn required(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(|v| v.as_array())
            .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.schema
            .get("properties")
            .and_then(|p| p.get(name))
            .is_some()
    }
}

/// Builder for constructing tool parameter schemas.
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        self.properties
            .insert(name.to_string(), json!({ "type": kind, "description": description }));
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, "string", description, required)
    }

    pub fn integer(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, "integer", description, required)
    }

    pub fn boolean(self, name: &str, description: &str, required: bool) -> Self {
        self.property(name, "boolean", description, required)
    }

    /// Build into AgentToolParameters.
    pub fn build(self) -> AgentToolParameters {
        AgentToolParameters {
            schema: json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
