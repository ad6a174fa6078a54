//! MCP error types.

use crate::client::ClientState;
use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn provider: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("provider channel closed")]
    ChannelClosed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("client not ready (state: {0})")]
    NotReady(ClientState),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("provider error: {0}")]
    Remote(#[from] JsonRpcError),

    #[error("timeout waiting for response")]
    Timeout,

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("response exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
