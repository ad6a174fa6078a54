//! Classification of raw engine completions.

use serde_json::{Map, Value};

use crate::tools::ToolCallRequest;

/// What a completion asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    /// `{name, arguments, thoughts?}`
    ToolCall(ToolCallRequest),
    /// Final natural-language answer.
    Answer(String),
    /// Neither shape could be recovered. Carries the reason.
    Malformed(String),
}

impl EngineReply {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Malformed("empty reply".to_string());
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            // Plain prose is a usable answer even though JSON was requested.
            Err(_) => return Self::Answer(trimmed.to_string()),
        };

        if let Some(object) = value.as_object() {
            if let Some(call) = tool_call(object) {
                return call;
            }
        }

        match extract_answer(&value) {
            Some(text) => Self::Answer(text),
            None => Self::Malformed(format!("no answer text in {trimmed}")),
        }
    }
}

fn tool_call(object: &Map<String, Value>) -> Option<EngineReply> {
    let name = object.get("name")?.as_str()?.trim();
    let arguments = object.get("arguments")?;
    if name.is_empty() {
        return Some(EngineReply::Malformed("tool call without a name".to_string()));
    }

    let arguments = match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => Value::Object(Map::new()),
        // Some models double-encode the arguments.
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(decoded @ Value::Object(_)) => decoded,
            _ => {
                return Some(EngineReply::Malformed(format!(
                    "arguments for {name} are not an object"
                )));
            }
        },
        _ => {
            return Some(EngineReply::Malformed(format!(
                "arguments for {name} are not an object"
            )));
        }
    };

    let mut request = ToolCallRequest::new(name, arguments);
    request.thoughts = object
        .get("thoughts")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string);
    Some(EngineReply::ToolCall(request))
}

/// Pull answer text out of a JSON reply.
///
/// Looks at `response`, `content`, then `thoughts`; a bare string is taken
/// as is; any other object is flattened to `key: value` pairs.
pub fn extract_answer(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Object(object) => ["response", "content", "thoughts"]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str).and_then(non_empty))
            .or_else(|| {
                let pairs: Vec<String> = object
                    .iter()
                    .map(|(key, value)| match value {
                        Value::String(s) => format!("{key}: {s}"),
                        other => format!("{key}: {other}"),
                    })
                    .collect();
                (!pairs.is_empty()).then(|| pairs.join(". "))
            }),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
