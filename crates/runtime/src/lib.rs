//! Toolbridge runtime: tool directory, engine supervision, conversation loop.
//!
//! This crate connects a local inference engine to any number of MCP tool
//! providers and runs the tool-calling loop between them.
//!
//! # Overview
//!
//! - **ToolDirectory**: one [`mcp::ToolProviderClient`] per provider process,
//!   merged into a single tool name → owner map.
//! - **EngineSupervisor**: starts, probes and restarts the inference engine
//!   and implements [`ChatEngine`] on top of its HTTP API.
//! - **Orchestrator**: per user turn, alternates engine completions and tool
//!   calls until the engine produces a plain answer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use runtime::{EngineConfig, EngineSupervisor, Orchestrator, ToolDirectory};
//!
//! # async fn example() -> runtime::Result<()> {
//! let directory = Arc::new(ToolDirectory::new(Vec::new()));
//! directory.connect_all().await;
//!
//! let engine = EngineSupervisor::new(EngineConfig::default());
//! let mut orchestrator = Orchestrator::new(engine, directory);
//! let turn = orchestrator.run_turn("What's new in Rust?").await?;
//! println!("{}", turn.answer);
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod engine;
mod error;
mod message;
pub mod orchestrator;
mod tools;

#[cfg(test)]
mod test_support;

pub use directory::{KeywordTable, ProviderFailure, RegisteredTool, ToolDirectory, ToolSpec};
pub use engine::{
    ChatEngine, EngineClient, EngineConfig, EngineProcessState, EngineSupervisor, LaunchConfig,
};
pub use error::{Error, Result};
pub use message::{Message, Role};
pub use orchestrator::{DEFAULT_SYSTEM_PROMPT, EngineReply, Orchestrator, OrchestratorConfig, Turn};
pub use tools::{ToolCallRequest, ToolCallResult, ToolOutcome};
