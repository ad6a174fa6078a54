//! Configuration loading from toolbridge.toml.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use mcp::ProviderConfig;
use runtime::{EngineConfig, KeywordTable, OrchestratorConfig};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "toolbridge.toml";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Tool providers keyed by name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Extra detection keywords per tool, merged over the built-in table.
    #[serde(default = "KeywordTable::empty")]
    pub keywords: KeywordTable,

    /// Replaces the default system prompt.
    pub system_prompt: Option<String>,

    /// Engine rounds allowed per turn.
    pub max_steps: Option<usize>,

    pub tool_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            providers: BTreeMap::new(),
            keywords: KeywordTable::empty(),
            system_prompt: None,
            max_steps: None,
            tool_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load `path` if given, else `toolbridge.toml` in the working directory
    /// if it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).exists() => Self::load(CONFIG_FILE),
            None => {
                tracing::info!("no {CONFIG_FILE} found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Provider launch settings, each named after its table key.
    pub fn provider_configs(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .map(|(name, provider)| ProviderConfig {
                name: name.clone(),
                ..provider.clone()
            })
            .collect()
    }

    /// Built-in keywords with the configured ones layered on top.
    pub fn keyword_table(&self) -> KeywordTable {
        let mut table = KeywordTable::default();
        table.extend(self.keywords.clone());
        table
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            system_prompt: self.system_prompt.clone().unwrap_or(defaults.system_prompt),
            max_steps: self.max_steps.unwrap_or(defaults.max_steps),
            tool_timeout: self
                .tool_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.tool_timeout),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some((name, _)) = self
            .providers
            .iter()
            .find(|(_, provider)| provider.command.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "provider '{name}' has an empty command"
            )));
        }
        if self.max_steps == Some(0) {
            return Err(ConfigError::Invalid("max_steps must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
