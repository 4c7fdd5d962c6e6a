//! Deriving MCP tool descriptors from sandbox definitions.

use rmcp::model::Tool;
use sandbox_core::SandboxConfig;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Build the MCP tool for a sandbox.
///
/// Pure and deterministic: the same definition always yields the same tool.
pub fn new_tool(config: &SandboxConfig) -> Tool {
    Tool::new(
        config.id.clone(),
        config.description.clone(),
        input_schema(config),
    )
}

/// JSON Schema for a sandbox's parameters.
pub fn input_schema(config: &SandboxConfig) -> Arc<Map<String, Value>> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in &config.parameters {
        let mut property = Map::new();
        property.insert("type".into(), json!(param.kind.as_str()));
        if !param.description.is_empty() {
            property.insert("description".into(), json!(param.description));
        }
        properties.insert(param.name.clone(), Value::Object(property));

        if param.required {
            required.push(json!(param.name));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    schema.insert("additionalProperties".into(), json!(false));
    Arc::new(schema)
}
