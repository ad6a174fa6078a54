//! Tool-call types exchanged between the orchestrator and the directory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique identifier for this call (used to correlate results).
    pub call_id: String,
    /// Name of the tool to invoke.
    pub tool_name: String,
    /// Arguments as JSON.
    pub arguments: Value,
    /// The model's stated reason for the call, if it gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: format!("call-{}", uuid::Uuid::new_v4()),
            tool_name: tool_name.into(),
            arguments,
            thoughts: None,
        }
    }
}

/// Outcome of a tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    /// Tool executed successfully. Output is already flattened to text.
    Success { output: String },
    /// Tool execution failed.
    Error { message: String },
}

/// The result returned to the model after a tool call.
///
/// Every request produces exactly one of these, failures included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, output: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: ToolOutcome::Success {
                output: output.into(),
            },
        }
    }

    pub fn error(request: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            outcome: ToolOutcome::Error {
                message: message.into(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    /// The output on success, the error message on failure.
    pub fn text(&self) -> &str {
        match &self.outcome {
            ToolOutcome::Success { output } => output,
            ToolOutcome::Error { message } => message,
        }
    }
}
