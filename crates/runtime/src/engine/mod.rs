//! Inference engine: HTTP client, process supervision, stray reclaim.
//!
//! The engine is an external long-running process reached over HTTP. The
//! [`EngineSupervisor`] owns its lifecycle; everything else talks to it
//! through the [`ChatEngine`] trait.

mod client;
mod reclaim;
mod supervisor;

pub use client::EngineClient;
pub use reclaim::reclaim_port;
pub use supervisor::{EngineProcessState, EngineSupervisor};

use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;

use crate::Result;
use crate::message::Message;

const DEFAULT_MODEL: &str = "qwen2.5-coder:7b-instruct";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Engine connection and launch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Model to use.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub temperature: Option<f32>,

    /// Upper bound on generated tokens (`num_predict`).
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Whether the supervisor starts and stops the engine process itself.
    /// When false the engine is only probed.
    #[serde(default = "default_true")]
    pub managed: bool,

    #[serde(default)]
    pub launch: LaunchConfig,

    /// Kill whatever else is listening on the engine port before launching.
    #[serde(default = "default_true")]
    pub reclaim_stray: bool,
}

/// How to start the engine process.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            command: "ollama".to_string(),
            args: vec!["serve".to_string()],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            temperature: None,
            max_tokens: None,
            managed: true,
            launch: LaunchConfig::default(),
            reclaim_stray: true,
        }
    }
}

impl EngineConfig {
    /// Base URL with `localhost` pinned to IPv4 and no trailing slash.
    pub fn normalized_base_url(&self) -> String {
        self.base_url
            .replace("localhost", "127.0.0.1")
            .trim_end_matches('/')
            .to_string()
    }

    /// Port the engine listens on, if the base URL names one.
    pub fn port(&self) -> Option<u16> {
        reqwest::Url::parse(&self.normalized_base_url())
            .ok()?
            .port_or_known_default()
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

/// Trait for anything that turns a message history into one completion.
///
/// Implementations return the raw completion text; interpreting it is the
/// orchestrator's job.
pub trait ChatEngine: Send + Sync {
    fn complete(&self, messages: &[Message]) -> impl Future<Output = Result<String>> + Send;
}

impl<T: ChatEngine> ChatEngine for Arc<T> {
    fn complete(&self, messages: &[Message]) -> impl Future<Output = Result<String>> + Send {
        (**self).complete(messages)
    }
}
