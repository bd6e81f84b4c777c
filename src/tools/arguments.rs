//! Typed access to tool call arguments.
//!
//! Tag attributes always arrive as strings, so numeric and boolean getters also accept
//! their string spellings.

use crate::error::{Result, RikkiError};

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.get_str_opt(key)
            .ok_or_else(|| RikkiError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Optional string argument, `None` when blank.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get_str_opt(key).filter(|s| !s.trim().is_empty())
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.get_i64_opt(key)
            .ok_or_else(|| RikkiError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    pub fn get_i64_opt(&self, key: &str) -> Option<i64> {
        match self.value.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get_bool_opt(key)
            .ok_or_else(|| RikkiError::InvalidArgument(format!("Missing boolean argument: {key}")))
    }

    pub fn get_bool_opt(&self, key: &str) -> Option<bool> {
        match self.value.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            RikkiError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
