//! Prompt material derived from tool schemas.

use mcp::ToolDescriptor;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// A tool definition exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolSpec {
    fn from(tool: &ToolDescriptor) -> Self {
        let description = tool
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Use the {} tool", tool.name));
        let properties = tool
            .input_schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let required = tool
            .input_schema
            .get("required")
            .cloned()
            .unwrap_or_else(|| json!([]));

        Self {
            name: tool.name.clone(),
            description,
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Build plausible example arguments from a JSON-Schema-like object.
///
/// Strings get a placeholder chosen from the property name, other scalar
/// types prefer the schema's own `example`, nested objects recurse.
pub fn example_arguments(schema: &Value) -> Value {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Value::Object(Map::new());
    };

    let mut example = Map::new();
    for (key, property) in properties {
        let sample = property.get("example").cloned();
        let value = match property.get("type").and_then(Value::as_str) {
            Some("string") => Value::String(string_placeholder(key)),
            Some("number") | Some("integer") => sample.unwrap_or_else(|| json!(1)),
            Some("boolean") => sample.unwrap_or(Value::Bool(true)),
            Some("object") => example_arguments(property),
            Some("array") => sample.unwrap_or_else(|| json!([])),
            _ => sample.unwrap_or(Value::Null),
        };
        example.insert(key.clone(), value);
    }
    Value::Object(example)
}

fn string_placeholder(key: &str) -> String {
    match key {
        "prompt" => "description of what you want".to_string(),
        "query" => "search query".to_string(),
        k if k.contains("path") => "filename.txt".to_string(),
        k if k.contains("content") => "content to write".to_string(),
        k => format!("example_{k}"),
    }
}

/// Instruction block showing the exact JSON shape for invoking `tool`.
pub fn format_instructions(tool: &ToolDescriptor) -> String {
    let arguments = example_arguments(&tool.input_schema);
    let arguments =
        serde_json::to_string_pretty(&arguments).unwrap_or_else(|_| arguments.to_string());
    let name = &tool.name;
    format!(
        "When using the {name} tool, respond with ONLY this JSON format:\n\
         {{\n  \"name\": \"{name}\",\n  \"arguments\": {arguments},\n  \
         \"thoughts\": \"Explanation of why you're using this tool\"\n}}"
    )
}
