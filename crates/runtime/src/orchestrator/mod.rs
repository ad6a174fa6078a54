//! The tool-calling conversation loop.
//!
//! One user turn alternates between asking the engine for a completion and,
//! when the completion names a tool, running that tool and feeding its
//! result back. The loop ends on a plain answer or at the step ceiling.

mod format;
mod reply;

pub use format::{format_tool_output, is_error_payload, mentions_rate_limit};
pub use reply::{EngineReply, extract_answer};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::directory::ToolDirectory;
use crate::engine::ChatEngine;
use crate::message::Message;
use crate::tools::{ToolCallRequest, ToolCallResult};
use crate::{Error, Result};

const DEFAULT_MAX_STEPS: usize = 6;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to various tools. You must always respond in JSON format:

1. When you need to use a tool, respond with:
{
  "name": "tool_name",
  "arguments": {
    "param1": "value1"
  },
  "thoughts": "why this tool is needed"
}

2. When providing information or analysis, respond with:
{
  "response": "your natural language response here"
}

Keep the "response" text clear and conversational. Never put raw JSON or technical formatting inside it."#;

const RATE_LIMIT_INSTRUCTION: &str = r#"The tool reported a rate limit. Return this exact JSON response:
{
  "response": "I apologize, but I've hit a rate limit for that service. Please try again in a few minutes."
}"#;

const MALFORMED_INSTRUCTION: &str = r#"Your last reply could not be understood. Reply with either a tool call {"name": ..., "arguments": {...}} or a final answer {"response": "..."}."#;

/// Per-turn limits and the base system prompt.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub system_prompt: String,
    /// Engine rounds allowed per turn.
    pub max_steps: usize,
    pub tool_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// Outcome of one user turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub answer: String,
    pub tool_results: Vec<ToolCallResult>,
    /// Engine rounds used.
    pub steps: usize,
    /// True when the step ceiling ended the turn and the answer was synthesised.
    pub exhausted: bool,
}

/// Drives the tool-calling loop against one engine and one directory.
pub struct Orchestrator<E> {
    engine: E,
    directory: Arc<ToolDirectory>,
    config: OrchestratorConfig,
    messages: Vec<Message>,
}

impl<E: ChatEngine> Orchestrator<E> {
    pub fn new(engine: E, directory: Arc<ToolDirectory>) -> Self {
        Self {
            engine,
            directory,
            config: OrchestratorConfig::default(),
            messages: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn directory(&self) -> &Arc<ToolDirectory> {
        &self.directory
    }

    /// History of the current (or last) turn.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Run one user turn to completion.
    ///
    /// Tool failures never fail the turn; they come back as error results
    /// and the engine is asked to explain them. Engine failures do.
    pub async fn run_turn(&mut self, input: &str) -> Result<Turn> {
        self.messages.clear();
        self.messages.push(Message::system(self.system_prompt()));

        if let Some(tool) = self.directory.detect(input) {
            debug!(%tool, "detected tool hint");
            if let Some(instructions) = self.directory.instructions_for(&tool) {
                self.messages.push(Message::system(instructions));
            }
        }
        self.messages.push(Message::user(input));

        let mut tool_results: Vec<ToolCallResult> = Vec::new();
        let mut last_thoughts = None;

        for step in 1..=self.config.max_steps {
            let raw = self.engine.complete(&self.messages).await?;

            match EngineReply::parse(&raw) {
                EngineReply::Answer(answer) => {
                    self.messages.push(Message::assistant(answer.clone()));
                    info!(step, tools = tool_results.len(), "turn complete");
                    return Ok(Turn {
                        answer,
                        tool_results,
                        steps: step,
                        exhausted: false,
                    });
                }
                EngineReply::ToolCall(request) => {
                    self.messages.push(Message::assistant(raw));
                    if request.thoughts.is_some() {
                        last_thoughts = request.thoughts.clone();
                    }
                    let result = self.execute(&request).await;
                    self.inject(&result);
                    tool_results.push(result);
                }
                EngineReply::Malformed(reason) => {
                    warn!(step, %reason, "unusable engine reply");
                    self.messages.push(Message::assistant(raw));
                    self.messages.push(Message::system(MALFORMED_INSTRUCTION));
                }
            }
        }

        warn!(max_steps = self.config.max_steps, "step ceiling reached");
        let answer = synthesize_answer(tool_results.last(), last_thoughts.as_deref());
        self.messages.push(Message::assistant(answer.clone()));
        Ok(Turn {
            answer,
            tool_results,
            steps: self.config.max_steps,
            exhausted: true,
        })
    }

    /// Like [`run_turn`](Self::run_turn), but always yields text for the user.
    pub async fn respond(&mut self, input: &str) -> String {
        match self.run_turn(input).await {
            Ok(turn) => turn.answer,
            Err(error) => {
                warn!(%error, "turn failed");
                explain(&error)
            }
        }
    }

    /// Run one tool call. Always produces a result.
    async fn execute(&self, request: &ToolCallRequest) -> ToolCallResult {
        info!(tool = %request.tool_name, call_id = %request.call_id, "calling tool");

        let call = self
            .directory
            .call_tool(&request.tool_name, request.arguments.clone());
        match tokio::time::timeout(self.config.tool_timeout, call).await {
            Err(_) => {
                warn!(tool = %request.tool_name, "tool call timed out");
                ToolCallResult::error(
                    request,
                    format!(
                        "tool {} did not answer within {:?}",
                        request.tool_name, self.config.tool_timeout
                    ),
                )
            }
            Ok(Err(error)) => {
                warn!(tool = %request.tool_name, %error, "tool call failed");
                ToolCallResult::error(request, error.to_string())
            }
            Ok(Ok(payload)) if is_error_payload(&payload) => {
                ToolCallResult::error(request, format_tool_output(&payload))
            }
            Ok(Ok(payload)) => ToolCallResult::success(request, format_tool_output(&payload)),
        }
    }

    fn inject(&mut self, result: &ToolCallResult) {
        let instruction = if mentions_rate_limit(result.text()) {
            RATE_LIMIT_INSTRUCTION.to_string()
        } else if result.is_error() {
            failure_instruction(result)
        } else {
            analysis_instruction(result.text())
        };
        self.messages.push(Message::system(instruction));
    }

    fn system_prompt(&self) -> String {
        let specs = self.directory.tool_specs();
        if specs.is_empty() {
            return self.config.system_prompt.clone();
        }
        let catalog = serde_json::to_string_pretty(&specs).unwrap_or_default();
        format!("{}\n\nAvailable tools:\n{catalog}", self.config.system_prompt)
    }
}

fn analysis_instruction(text: &str) -> String {
    format!(
        r#"You are analyzing tool results and must respond in this exact JSON format:
{{
  "response": "your natural language analysis here"
}}

Here are the results to analyze: {text}

Remember:
1. The response must be natural language, not raw data
2. Focus on the key information
3. Do not include any JSON in the response text itself
4. Give a complete answer without asking follow-up questions"#
    )
}

fn failure_instruction(result: &ToolCallResult) -> String {
    format!(
        r#"The {} tool failed: {}

Respond in this exact JSON format:
{{
  "response": "a short natural language explanation for the user"
}}
Either answer from what you already know or explain that the action could not be completed."#,
        result.tool_name,
        result.text()
    )
}

fn synthesize_answer(last: Option<&ToolCallResult>, thoughts: Option<&str>) -> String {
    match (last, thoughts) {
        (Some(result), _) if !result.is_error() && !result.text().is_empty() => {
            format!("Here is what I found: {}", result.text())
        }
        (Some(result), _) if result.is_error() => {
            format!("I couldn't complete that request: {}", result.text())
        }
        (_, Some(thoughts)) => thoughts.to_string(),
        _ => "I wasn't able to reach a final answer for that request.".to_string(),
    }
}

fn explain(error: &Error) -> String {
    match error {
        Error::EngineUnavailable { .. } | Error::EngineStartFailed(_) | Error::Connect(_) => {
            "I can't reach the language model right now. Please try again in a moment."
                .to_string()
        }
        Error::Timeout(_) => {
            "The language model took too long to answer. Please try again.".to_string()
        }
        other => format!("Sorry, something went wrong while answering: {other}"),
    }
}
