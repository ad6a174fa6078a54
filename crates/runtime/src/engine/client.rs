//! HTTP client for the inference engine (Ollama-style API).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EngineConfig;
use crate::message::Message;
use crate::{Error, Result};

/// Completion requests may legitimately take minutes on local hardware.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    stream: bool,
    format: &'static str,
    options: ApiOptions,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    message: ApiReply,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    #[allow(dead_code)]
    role: String,
    content: String,
}

/// Inference engine API client.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl EngineClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.normalized_base_url(),
            model: config.model.clone(),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            request_timeout: REQUEST_TIMEOUT,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Liveness check against the status endpoint.
    pub async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(status = %response.status(), "health probe rejected");
                false
            }
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// Send the message history and return the completion text.
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let request = ApiRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: false,
            format: "json",
            options: ApiOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        debug!(model = %self.model, messages = messages.len(), "sending chat request");
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Engine(format!("{status}: {body}")));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| Error::MalformedResponse(e.to_string()))?;
        Ok(parsed.message.content)
    }

    fn transport_error(&self, error: reqwest::Error) -> Error {
        if error.is_connect() {
            Error::Connect(error.to_string())
        } else if error.is_timeout() {
            Error::Timeout(self.request_timeout)
        } else {
            Error::Engine(error.to_string())
        }
    }
}
