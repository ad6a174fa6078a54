use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("cannot reach inference engine: {0}")]
    Connect(String),

    #[error("inference engine failed to start: {0}")]
    EngineStartFailed(String),

    #[error("inference engine unavailable after {attempts} attempts: {reason}")]
    EngineUnavailable { attempts: u32, reason: String },

    #[error("engine request failed: {0}")]
    Engine(String),

    #[error("engine request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed engine response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
