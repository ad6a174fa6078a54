//! MCP (Model Context Protocol) client library.
//!
//! This crate talks to tool-provider processes over their standard streams:
//! one JSON-RPC message per line on stdin/stdout, stderr kept for
//! diagnostics.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{ProviderConfig, ToolProviderClient};
//!
//! # async fn example() -> mcp::Result<()> {
//! let client = ToolProviderClient::new(ProviderConfig {
//!     name: "filesystem".to_string(),
//!     command: "mcp-server-filesystem".to_string(),
//!     args: vec!["./workspace".to_string()],
//!     ..ProviderConfig::default()
//! });
//! client.connect().await?;
//!
//! for tool in client.tools() {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool("read_file", serde_json::json!({ "path": "./README.md" }))
//!     .await?;
//! println!("{result}");
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

mod channel;
mod client;
mod error;
mod protocol;

pub use channel::{ChannelEvent, ChannelEvents, MAX_LINE_SIZE, OVERFLOW_HEAD, ProcessChannel};
pub use client::{ClientState, DEFAULT_TIMEOUT, ProviderConfig, ToolProviderClient};
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, PROTOCOL_VERSION, RequestId, ServerInfo, ToolDescriptor,
};
