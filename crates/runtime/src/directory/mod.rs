//! Tool directory: one client per provider process, one owner per tool.

mod hints;
mod keywords;

pub use hints::{ToolSpec, example_arguments, format_instructions};
pub use keywords::KeywordTable;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use mcp::{ClientState, ProviderConfig, ToolDescriptor, ToolProviderClient};
use serde_json::Value;
use tracing::{info, warn};

use crate::{Error, Result};

/// A tool with its source provider.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    /// The tool definition from MCP.
    pub tool: ToolDescriptor,
    /// Name of the provider serving this tool.
    pub provider: String,
}

/// A provider that could not be brought up.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: mcp::Error,
}

/// Merges the catalogs of many providers into a single name → owner map.
pub struct ToolDirectory {
    configs: Vec<ProviderConfig>,
    clients: RwLock<HashMap<String, Arc<ToolProviderClient>>>,
    owners: RwLock<HashMap<String, String>>,
    tools: RwLock<Vec<RegisteredTool>>,
    keywords: KeywordTable,
}

impl ToolDirectory {
    /// Create a directory for the given provider configurations.
    pub fn new(configs: Vec<ProviderConfig>) -> Self {
        Self {
            configs,
            clients: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
            tools: RwLock::new(Vec::new()),
            keywords: KeywordTable::default(),
        }
    }

    /// Create an empty directory (no providers).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_keywords(mut self, keywords: KeywordTable) -> Self {
        self.keywords = keywords;
        self
    }

    /// Connect every configured provider concurrently.
    ///
    /// A provider that fails is left out of the directory and reported in
    /// the returned list; the others are registered regardless.
    pub async fn connect_all(&self) -> Vec<ProviderFailure> {
        let attempts = self.configs.iter().map(|config| async move {
            let client = Arc::new(ToolProviderClient::new(config.clone()));
            let outcome = client.connect().await;
            (client, outcome)
        });

        let mut failures = Vec::new();
        for (client, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => self.attach(client),
                Err(error) => {
                    warn!(provider = %client.name(), %error, "provider unavailable");
                    failures.push(ProviderFailure {
                        provider: client.name().to_string(),
                        error,
                    });
                }
            }
        }

        info!(
            providers = self.providers().len(),
            tools = self.read_tools().len(),
            failed = failures.len(),
            "tool directory ready"
        );
        failures
    }

    /// Register an already-connected client and its cached catalog.
    ///
    /// A tool name already owned by another provider keeps its first owner.
    pub fn attach(&self, client: Arc<ToolProviderClient>) {
        let provider = client.name().to_string();
        let catalog = client.tools();

        {
            let mut owners = self.owners.write().unwrap_or_else(|e| e.into_inner());
            let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
            for tool in catalog {
                if let Some(owner) = owners.get(&tool.name) {
                    warn!(tool = %tool.name, %owner, duplicate = %provider, "tool name already registered");
                    continue;
                }
                owners.insert(tool.name.clone(), provider.clone());
                tools.push(RegisteredTool {
                    tool,
                    provider: provider.clone(),
                });
            }
        }

        info!(provider = %provider, "registered provider");
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider, client);
    }

    /// Remove a provider and every tool it owned.
    pub fn detach(&self, provider: &str) -> Option<Arc<ToolProviderClient>> {
        let client = self
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(provider)?;
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, owner| owner != provider);
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| t.provider != provider);
        Some(client)
    }

    /// Detach providers whose process has gone away.
    fn prune_closed(&self) {
        let closed: Vec<String> = self
            .clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, client)| client.state() == ClientState::Closed)
            .map(|(name, _)| name.clone())
            .collect();
        for provider in closed {
            if self.detach(&provider).is_some() {
                warn!(%provider, "provider closed, its tools are no longer offered");
            }
        }
    }

    /// The client that owns `tool_name`.
    pub fn resolve(&self, tool_name: &str) -> Result<Arc<ToolProviderClient>> {
        self.prune_closed();
        let owner = self
            .owners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tool_name)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))?;

        self.clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&owner)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(tool_name.to_string()))
    }

    /// Resolve the owner of `tool_name` and invoke it.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let client = self.resolve(tool_name)?;
        Ok(client.call_tool(tool_name, arguments).await?)
    }

    /// List all registered tools, in registration order.
    pub fn tools(&self) -> Vec<RegisteredTool> {
        self.prune_closed();
        self.read_tools().clone()
    }

    /// Get a tool by name.
    pub fn tool(&self, name: &str) -> Option<ToolDescriptor> {
        self.prune_closed();
        self.read_tools()
            .iter()
            .find(|t| t.tool.name == name)
            .map(|t| t.tool.clone())
    }

    /// Flattened schema list across every provider.
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.prune_closed();
        self.read_tools()
            .iter()
            .map(|t| ToolSpec::from(&t.tool))
            .collect()
    }

    /// Names of providers currently serving tools.
    pub fn providers(&self) -> Vec<String> {
        self.prune_closed();
        let mut names: Vec<_> = self
            .clients
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Guess which tool the text is asking for. A hint, not a decision.
    pub fn detect(&self, text: &str) -> Option<String> {
        self.prune_closed();
        let tools = self.read_tools();
        self.keywords
            .detect(text, tools.iter().map(|t| t.tool.name.as_str()))
            .map(str::to_string)
    }

    /// JSON invocation instructions for one tool.
    pub fn instructions_for(&self, tool_name: &str) -> Option<String> {
        self.tool(tool_name).map(|tool| format_instructions(&tool))
    }

    /// Close every provider and forget all tools.
    pub async fn close_all(&self) {
        let clients: Vec<_> = self
            .clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, client)| client)
            .collect();
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        for client in clients {
            client.close().await;
        }
    }

    fn read_tools(&self) -> std::sync::RwLockReadGuard<'_, Vec<RegisteredTool>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{in_memory_provider, mortal_provider};
    use std::time::Duration;
    use serde_json::json;

    #[test]
    fn empty_directory_has_no_tools() {
        let directory = ToolDirectory::empty();
        assert!(directory.tools().is_empty());
        assert!(directory.detect("search the web").is_none());
        assert!(matches!(
            directory.resolve("anything"),
            Err(Error::UnknownTool(name)) if name == "anything"
        ));
    }

    #[tokio::test]
    async fn attach_maps_tools_to_owner() {
        let directory = ToolDirectory::empty();
        let search = in_memory_provider(
            "search",
            json!([{"name": "brave_web_search", "description": "Search",
                    "inputSchema": {"properties": {"query": {"type": "string"}}, "required": ["query"]}}]),
            |_, _| None,
        )
        .await;
        let files = in_memory_provider("files", json!([{"name": "read_file"}]), |_, _| None).await;
        directory.attach(search);
        directory.attach(files);

        assert_eq!(directory.resolve("read_file").unwrap().name(), "files");
        assert_eq!(directory.resolve("brave_web_search").unwrap().name(), "search");
        assert_eq!(directory.providers(), vec!["files".to_string(), "search".to_string()]);

        let specs = directory.tool_specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].parameters["required"], json!(["query"]));
        assert_eq!(specs[1].description, "Use the read_file tool");

        assert_eq!(
            directory.detect("search the web for today's headlines").as_deref(),
            Some("brave_web_search")
        );
        assert!(directory.detect("hello there").is_none());
        assert!(
            directory
                .instructions_for("brave_web_search")
                .unwrap()
                .contains("search query")
        );
    }

    #[tokio::test]
    async fn call_tool_routes_to_owner() {
        let directory = ToolDirectory::empty();
        directory.attach(
            in_memory_provider("echo", json!([{"name": "echo"}]), |_, args| {
                Some(json!({"content": [{"type": "text", "text": args["text"]}]}))
            })
            .await,
        );

        let result = directory.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
        assert!(matches!(
            directory.call_tool("missing", json!({})).await,
            Err(Error::UnknownTool(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_tool_keeps_first_owner() {
        let directory = ToolDirectory::empty();
        directory.attach(in_memory_provider("a", json!([{"name": "echo"}]), |_, _| None).await);
        directory.attach(in_memory_provider("b", json!([{"name": "echo"}]), |_, _| None).await);

        assert_eq!(directory.tools().len(), 1);
        assert_eq!(directory.resolve("echo").unwrap().name(), "a");
    }

    #[tokio::test]
    async fn close_all_empties_directory() {
        let directory = ToolDirectory::empty();
        let client = in_memory_provider("a", json!([{"name": "echo"}]), |_, _| None).await;
        directory.attach(client.clone());

        directory.close_all().await;

        assert!(directory.tools().is_empty());
        assert!(directory.resolve("echo").is_err());
        assert_eq!(client.state(), mcp::ClientState::Closed);
    }

    #[tokio::test]
    async fn exited_provider_tools_are_withdrawn() {
        let directory = ToolDirectory::empty();
        directory.attach(in_memory_provider("files", json!([{"name": "read_file"}]), |_, _| None).await);
        let (search, kill) = mortal_provider(
            "search",
            json!([{"name": "brave_web_search", "description": "Search"}]),
        )
        .await;
        directory.attach(search.clone());
        assert_eq!(
            directory.detect("search the web for today's headlines").as_deref(),
            Some("brave_web_search")
        );

        drop(kill);
        for _ in 0..50 {
            if search.state() == mcp::ClientState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(search.state(), mcp::ClientState::Closed);

        assert!(matches!(
            directory.resolve("brave_web_search"),
            Err(Error::UnknownTool(_))
        ));
        let names: Vec<_> = directory.tools().into_iter().map(|t| t.tool.name).collect();
        assert_eq!(names, vec!["read_file".to_string()]);
        assert_eq!(directory.tool_specs().len(), 1);
        assert!(directory.detect("search the web for today's headlines").is_none());
        assert!(directory.instructions_for("brave_web_search").is_none());
        assert_eq!(directory.providers(), vec!["files".to_string()]);
        assert_eq!(directory.resolve("read_file").unwrap().name(), "files");
    }

    #[tokio::test]
    async fn detach_withdraws_only_that_provider() {
        let directory = ToolDirectory::empty();
        directory.attach(in_memory_provider("a", json!([{"name": "echo"}]), |_, _| None).await);
        directory.attach(in_memory_provider("b", json!([{"name": "read_file"}]), |_, _| None).await);

        assert_eq!(directory.detach("a").unwrap().name(), "a");
        assert!(directory.detach("a").is_none());
        assert!(directory.resolve("echo").is_err());
        assert_eq!(directory.resolve("read_file").unwrap().name(), "b");
    }

    /// A provider that answers the handshake and a one-tool listing, then
    /// idles until stdin closes. Request ids are deterministic: 1 and 2.
    #[cfg(unix)]
    fn scripted_provider(name: &str, tool: &str) -> ProviderConfig {
        let script = format!(
            "read line; \
             echo '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{{}}}}}}'; \
             read line; read line; \
             echo '{{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{{\"tools\":[{{\"name\":\"{tool}\"}}]}}}}'; \
             cat > /dev/null"
        );
        ProviderConfig {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            ..ProviderConfig::default()
        }
    }

    /// Spawns fine, then answers `initialize` without a protocol version.
    #[cfg(unix)]
    fn bad_handshake_provider(name: &str) -> ProviderConfig {
        let script = "read line; \
             echo '{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"capabilities\":{}}}'; \
             cat > /dev/null";
        ProviderConfig {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..ProviderConfig::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_handshake_does_not_block_the_rest() {
        let directory = ToolDirectory::new(vec![
            scripted_provider("first", "alpha"),
            bad_handshake_provider("second"),
            scripted_provider("third", "gamma"),
        ]);

        let failures = directory.connect_all().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "second");
        assert!(matches!(failures[0].error, mcp::Error::Handshake(_)));
        assert_eq!(directory.providers(), vec!["first".to_string(), "third".to_string()]);
        let names: Vec<_> = directory.tools().into_iter().map(|t| t.tool.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "gamma".to_string()]);

        directory.close_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn one_broken_provider_does_not_block_the_rest() {
        let broken = ProviderConfig {
            name: "broken".to_string(),
            command: "definitely-not-a-real-provider-binary".to_string(),
            ..ProviderConfig::default()
        };
        let directory = ToolDirectory::new(vec![
            scripted_provider("first", "alpha"),
            broken,
            scripted_provider("third", "gamma"),
        ]);

        let failures = directory.connect_all().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "broken");
        assert!(matches!(failures[0].error, mcp::Error::Spawn(_)));
        assert_eq!(directory.resolve("alpha").unwrap().name(), "first");
        assert_eq!(directory.resolve("gamma").unwrap().name(), "third");
        let names: Vec<_> = directory.tools().into_iter().map(|t| t.tool.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "gamma".to_string()]);

        directory.close_all().await;
    }
}
