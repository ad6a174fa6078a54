//! Flattening tool payloads into text the engine can read.

use serde_json::Value;

/// Reduce a `tools/call` payload to a single line of plain text.
///
/// `content` arrays contribute their text items and image urls; anything
/// else is serialized. Markup is stripped, common entities decoded and
/// whitespace collapsed.
pub fn format_tool_output(payload: &Value) -> String {
    let raw = match payload.get("content").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(content_item)
            .collect::<Vec<_>>()
            .join("\n"),
        None => match payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    clean_text(&raw)
}

fn content_item(item: &Value) -> Option<String> {
    match item.get("type").and_then(Value::as_str) {
        Some("text") => item.get("text").and_then(Value::as_str).map(str::to_string),
        Some("image") => item
            .get("url")
            .or_else(|| item.get("uri"))
            .and_then(Value::as_str)
            .map(|url| format!("[Image: {url}]")),
        Some("resource") => item
            .pointer("/resource/text")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

/// Whether the payload is a provider-reported failure (`isError: true`).
pub fn is_error_payload(payload: &Value) -> bool {
    payload.get("isError").and_then(Value::as_bool).unwrap_or(false)
}

pub fn mentions_rate_limit(text: &str) -> bool {
    text.to_lowercase().contains("rate limit")
}

fn clean_text(text: &str) -> String {
    let stripped = strip_tags(text);
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop `<tag>` and `</tag>` sequences. A `<` not followed by a letter,
/// `/` or `!` is kept, so comparisons like `a < b` survive.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let opens_tag = tail[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        match tail.find('>') {
            Some(end) if opens_tag => {
                out.push(' ');
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entities(text: &str) -> String {
    const ENTITIES: [(&str, &str); 7] = [
        ("&#x27;", "'"),
        ("&#39;", "'"),
        ("&quot;", "\""),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&nbsp;", " "),
        ("&amp;", "&"),
    ];
    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}
