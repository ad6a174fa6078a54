//! Tool-provider client: handshake, request correlation, tool listing and
//! invocation over one [`ProcessChannel`].

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelEvents, MAX_LINE_SIZE, ProcessChannel};
use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, Inbound, InboundMessage, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListToolsResult, PROTOCOL_VERSION, ToolDescriptor,
    leading_response_id,
};

/// Default timeout for handshake and listing requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Launch parameters for a provider process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Connection lifecycle of a [`ToolProviderClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

type Reply = Result<Value>;

struct PendingRequest {
    responder: oneshot::Sender<Reply>,
    method: String,
    created_at: Instant,
}

/// Outstanding requests keyed by id.
///
/// Once `closed` is set nothing new can be registered, so a request can
/// never slip in after the exit drain and wait forever.
#[derive(Default)]
struct PendingTable {
    entries: HashMap<i64, PendingRequest>,
    closed: bool,
}

/// State shared between callers and the inbound dispatcher task.
struct Shared {
    name: String,
    state: Mutex<ClientState>,
    pending: Mutex<PendingTable>,
    tools: RwLock<Vec<ToolDescriptor>>,
}

impl Shared {
    fn state(&self) -> ClientState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ClientState) {
        debug!(provider = %self.name, %state, "client state");
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, id: i64, method: &str, responder: oneshot::Sender<Reply>) -> Result<()> {
        let mut table = self.table();
        if table.closed {
            return Err(Error::ChannelClosed);
        }
        table.entries.insert(
            id,
            PendingRequest {
                responder,
                method: method.to_string(),
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Reject everything outstanding. Dropping a responder surfaces as
    /// `ChannelClosed` on the waiting side.
    fn close_table(&self) {
        let drained: Vec<_> = {
            let mut table = self.table();
            table.closed = true;
            table.entries.drain().collect()
        };
        if !drained.is_empty() {
            debug!(provider = %self.name, count = drained.len(), "rejecting pending requests");
        }
    }

    /// Fail the request an oversized response was meant for. When its id
    /// cannot be read from the head of the line, fail everything
    /// outstanding rather than leave the owner waiting.
    fn reject_oversized(&self, head: &str) {
        let mut table = self.table();
        let victims: Vec<i64> = match leading_response_id(head) {
            Some(id) if table.entries.contains_key(&id) => vec![id],
            _ => table.entries.keys().copied().collect(),
        };
        for id in victims {
            if let Some(pending) = table.entries.remove(&id) {
                warn!(
                    provider = %self.name,
                    id,
                    method = %pending.method,
                    "response too large, request failed"
                );
                let _ = pending.responder.send(Err(Error::OutputTooLarge {
                    limit: MAX_LINE_SIZE,
                }));
            }
        }
    }

    fn clear_tools(&self) {
        self.tools.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn reopen_table(&self) {
        let mut table = self.table();
        table.closed = false;
        table.entries.clear();
    }

    fn handle_line(&self, line: &str) {
        let message: InboundMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(provider = %self.name, error = %e, "dropping unparseable line");
                return;
            }
        };

        match message.classify() {
            Inbound::Response { id, outcome } => {
                let Some(key) = id.as_number() else {
                    warn!(provider = %self.name, ?id, "dropping response with foreign id");
                    return;
                };
                let entry = self.table().entries.remove(&key);
                match entry {
                    Some(pending) => {
                        debug!(
                            provider = %self.name,
                            id = key,
                            method = %pending.method,
                            elapsed = ?pending.created_at.elapsed(),
                            "response received"
                        );
                        let _ = pending.responder.send(outcome.map_err(Error::Remote));
                    }
                    None => warn!(provider = %self.name, id = key, "response for unknown id"),
                }
            }
            Inbound::ServerMessage { method } => {
                debug!(provider = %self.name, %method, "ignoring provider-initiated message");
            }
            Inbound::Unaddressed => {
                warn!(provider = %self.name, "dropping message without id");
            }
        }
    }
}

/// Removes a pending entry when the waiting future goes away, whether it
/// completed, timed out, or was cancelled.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.table().entries.remove(&self.id);
    }
}

async fn dispatch(shared: Arc<Shared>, mut events: ChannelEvents) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Line(line) => shared.handle_line(&line),
            ChannelEvent::Diagnostic(line) => {
                debug!(provider = %shared.name, "stderr: {line}");
            }
            ChannelEvent::Overflow(head) => shared.reject_oversized(&head),
            ChannelEvent::Exited(code) => {
                info!(provider = %shared.name, ?code, "provider process exited");
                break;
            }
        }
    }
    shared.clear_tools();
    shared.close_table();
    shared.set_state(ClientState::Closed);
}

/// Client for one tool-provider process.
pub struct ToolProviderClient {
    config: ProviderConfig,
    shared: Arc<Shared>,
    attached: Mutex<Option<(ProcessChannel, ChannelEvents)>>,
    channel: RwLock<Option<Arc<ProcessChannel>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    server_info: RwLock<Option<InitializeResult>>,
    next_id: AtomicI64,
    timeout: Duration,
}

impl ToolProviderClient {
    /// Create a client that spawns `config.command` on [`connect`](Self::connect).
    pub fn new(config: ProviderConfig) -> Self {
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            state: Mutex::new(ClientState::Disconnected),
            pending: Mutex::new(PendingTable::default()),
            tools: RwLock::new(Vec::new()),
        });
        Self {
            config,
            shared,
            attached: Mutex::new(None),
            channel: RwLock::new(None),
            dispatcher: Mutex::new(None),
            server_info: RwLock::new(None),
            next_id: AtomicI64::new(1),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client over an already-wired channel (in-process providers).
    pub fn with_channel(
        name: impl Into<String>,
        channel: ProcessChannel,
        events: ChannelEvents,
    ) -> Self {
        let config = ProviderConfig {
            name: name.into(),
            ..ProviderConfig::default()
        };
        let client = Self::new(config);
        *client.attached.lock().unwrap_or_else(|e| e.into_inner()) = Some((channel, events));
        client
    }

    /// Override the handshake and listing deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the provider name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    /// Get server info (after initialization).
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Cached tool catalog, without any I/O.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.shared
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.shared
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|t| t.name == name)
    }

    /// Start the provider, perform the handshake and cache its tool catalog.
    ///
    /// On any failure the client is closed before the error is returned.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            ClientState::Ready => return Ok(()),
            ClientState::Disconnected | ClientState::Closed => {}
            other => return Err(Error::NotReady(other)),
        }

        if let Err(e) = self.establish().await {
            warn!(provider = %self.name(), error = %e, "connection failed");
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn establish(&self) -> Result<()> {
        self.shared.set_state(ClientState::Connecting);

        let attached = self
            .attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let (channel, events) = match attached {
            Some(pair) => pair,
            None => ProcessChannel::spawn(
                &self.config.command,
                &self.config.args,
                self.config.working_dir.as_deref(),
                &self.config.env,
            )?,
        };

        self.shared.reopen_table();
        *self.channel.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(channel));
        let handle = tokio::spawn(dispatch(self.shared.clone(), events));
        if let Some(old) = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            old.abort();
        }

        self.shared.set_state(ClientState::Initializing);

        let params = serde_json::to_value(InitializeParams::default())?;
        let raw = match self.request("initialize", Some(params), Some(self.timeout)).await {
            Ok(raw) => raw,
            Err(Error::Remote(e)) => return Err(Error::Handshake(e.to_string())),
            Err(e) => return Err(e),
        };
        let info = InitializeResult::from_value(raw).map_err(Error::Handshake)?;
        if info.protocol_version != PROTOCOL_VERSION {
            warn!(
                provider = %self.name(),
                theirs = %info.protocol_version,
                ours = PROTOCOL_VERSION,
                "provider negotiated a different protocol version"
            );
        }

        self.notify("notifications/initialized", None).await?;

        debug!(provider = %self.name(), server = ?info.server_info, "session initialized");
        *self.server_info.write().unwrap_or_else(|e| e.into_inner()) = Some(info);
        self.shared.set_state(ClientState::Ready);

        let tools = self.list_tools().await?;
        info!(provider = %self.name(), count = tools.len(), "provider ready");
        Ok(())
    }

    /// Refresh the tool catalog from the provider and return it.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_ready()?;

        let raw = self.request("tools/list", None, Some(self.timeout)).await?;
        let listed: ListToolsResult = serde_json::from_value(raw)
            .map_err(|e| Error::MalformedResponse(format!("tools/list: {e}")))?;

        *self.shared.tools.write().unwrap_or_else(|e| e.into_inner()) = listed.tools.clone();
        Ok(listed.tools)
    }

    /// Invoke a tool and return the provider's raw result payload.
    ///
    /// A name missing from the cached catalog is still sent, since the
    /// catalog may be stale. If the provider then rejects it, the error is
    /// reported as [`Error::ToolNotFound`].
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.ensure_ready()?;

        let known = self.has_tool(name);
        if !known {
            warn!(provider = %self.name(), tool = name, "tool not in cached catalog, calling anyway");
        }

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;

        match self.request("tools/call", Some(params), None).await {
            Err(Error::Remote(e)) if !known => {
                debug!(provider = %self.name(), tool = name, error = %e, "unknown tool rejected");
                Err(Error::ToolNotFound(name.to_string()))
            }
            other => other,
        }
    }

    /// Terminate the provider and reject everything outstanding.
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.shared.set_state(ClientState::Closed);

        let channel = self
            .channel
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(channel) = channel {
            channel.stop().await;
        }

        self.shared.close_table();
        self.shared.clear_tools();

        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    // --- Internal methods ---

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ClientState::Ready => Ok(()),
            ClientState::Closed => Err(Error::ChannelClosed),
            other => Err(Error::NotReady(other)),
        }
    }

    fn channel(&self) -> Result<Arc<ProcessChannel>> {
        self.channel
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::ChannelClosed)
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let channel = self.channel()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        self.shared.register(id, method, tx)?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        let mut request = JsonRpcRequest::new(id, method);
        if let Some(params) = params {
            request = request.with_params(params);
        }
        let line = serde_json::to_string(&request)?;
        debug!(provider = %self.name(), id, method, "sending request");
        channel.send(&line).await?;

        let reply = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, rx)
                .await
                .map_err(|_| Error::Timeout)?,
            None => rx.await,
        };

        reply.unwrap_or(Err(Error::ChannelClosed))
    }

    /// Send a notification. Resolves once the write completes.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let channel = self.channel()?;
        let mut notification = JsonRpcNotification::new(method);
        notification.params = params;
        let line = serde_json::to_string(&notification)?;
        debug!(provider = %self.name(), method, "sending notification");
        channel.send(&line).await
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.shared.table().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };

    /// Far end of an in-memory provider connection.
    struct FakeProvider {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeProvider {
        async fn recv(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().expect("client hung up");
            serde_json::from_str(&line).unwrap()
        }

        async fn send_raw(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn reply(&mut self, request: &Value, result: Value) {
            let msg = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
            self.send_raw(&msg.to_string()).await;
        }

        async fn reply_error(&mut self, request: &Value, message: &str) {
            let msg = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32602, "message": message}
            });
            self.send_raw(&msg.to_string()).await;
        }

        /// Serve initialize, the initialized notification and the first listing.
        async fn accept(&mut self, tools: Value) {
            let init = self.recv().await;
            assert_eq!(init["method"], "initialize");
            assert_eq!(init["params"]["protocolVersion"], PROTOCOL_VERSION);
            self.reply(
                &init,
                json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {"tools": {}},
                       "serverInfo": {"name": "fake"}}),
            )
            .await;

            let note = self.recv().await;
            assert_eq!(note["method"], "notifications/initialized");
            assert!(note.get("id").is_none());

            let list = self.recv().await;
            assert_eq!(list["method"], "tools/list");
            self.reply(&list, json!({ "tools": tools })).await;
        }
    }

    fn wire(name: &str) -> (ToolProviderClient, FakeProvider) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(ours);
        let (channel, events) = ProcessChannel::from_pipes(reader, writer);
        let client = ToolProviderClient::with_channel(name, channel, events)
            .with_timeout(Duration::from_secs(2));

        let (their_reader, their_writer) = tokio::io::split(theirs);
        let provider = FakeProvider {
            lines: BufReader::new(their_reader).lines(),
            writer: their_writer,
        };
        (client, provider)
    }

    fn echo_tool() -> Value {
        json!([{
            "name": "echo",
            "description": "Echo the tag back",
            "inputSchema": {"type": "object", "properties": {"tag": {"type": "string"}}}
        }])
    }

    /// The exit drain runs on the dispatcher task.
    async fn wait_for_closed(client: &ToolProviderClient) {
        for _ in 0..50 {
            if client.state() == ClientState::Closed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client still {}", client.state());
    }

    fn huge_text() -> String {
        "x".repeat(MAX_LINE_SIZE + 10)
    }

    async fn ready(name: &str) -> (ToolProviderClient, FakeProvider) {
        let (client, mut provider) = wire(name);
        let (connected, _) = tokio::join!(client.connect(), provider.accept(echo_tool()));
        connected.unwrap();
        (client, provider)
    }

    #[tokio::test]
    async fn connect_performs_handshake_and_caches_tools() {
        let (client, _provider) = ready("fake").await;
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.name(), "fake");
        assert!(client.has_tool("echo"));
        assert_eq!(client.server_info().unwrap().protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn handshake_without_protocol_version_fails() {
        let (client, mut provider) = wire("bad");
        let serve = async {
            let init = provider.recv().await;
            provider.reply(&init, json!({"capabilities": {}})).await;
        };
        let (connected, _) = tokio::join!(client.connect(), serve);

        assert!(matches!(connected, Err(Error::Handshake(_))));
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn calls_before_connect_are_not_ready() {
        let (client, _provider) = wire("idle");
        assert!(matches!(
            client.call_tool("echo", json!({})).await,
            Err(Error::NotReady(ClientState::Disconnected))
        ));
        assert!(matches!(
            client.list_tools().await,
            Err(Error::NotReady(ClientState::Disconnected))
        ));
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_callers() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            let first = provider.recv().await;
            let second = provider.recv().await;
            for request in [&second, &first] {
                let tag = request["params"]["arguments"]["tag"].clone();
                provider.reply(request, json!({ "tag": tag })).await;
            }
        };
        let (a, b, _) = tokio::join!(
            client.call_tool("echo", json!({"tag": "a"})),
            client.call_tool("echo", json!({"tag": "b"})),
            serve
        );

        assert_eq!(a.unwrap()["tag"], "a");
        assert_eq!(b.unwrap()["tag"], "b");
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn provider_exit_fails_every_pending_call() {
        let (client, mut provider) = ready("fake").await;

        let serve = async move {
            for _ in 0..3 {
                provider.recv().await;
            }
            drop(provider);
        };
        let (a, b, c, _) = tokio::join!(
            client.call_tool("echo", json!({"tag": 1})),
            client.call_tool("echo", json!({"tag": 2})),
            client.call_tool("echo", json!({"tag": 3})),
            serve
        );

        for result in [a, b, c] {
            assert!(matches!(result, Err(Error::ChannelClosed)));
        }
        wait_for_closed(&client).await;
        assert!(matches!(
            client.call_tool("echo", json!({})).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn provider_exit_discards_cached_catalog() {
        let (client, provider) = ready("fake").await;
        assert!(client.has_tool("echo"));

        drop(provider);
        wait_for_closed(&client).await;

        assert!(client.tools().is_empty());
        assert!(!client.has_tool("echo"));
    }

    #[tokio::test]
    async fn oversized_reply_fails_only_its_own_call() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            let first = provider.recv().await;
            let second = provider.recv().await;
            let (big, small) = if first["params"]["arguments"]["tag"] == "big" {
                (first, second)
            } else {
                (second, first)
            };
            let line = format!(
                r#"{{"jsonrpc":"2.0","id":{},"result":{{"content":[{{"type":"text","text":"{}"}}]}}}}"#,
                big["id"],
                huge_text()
            );
            provider.send_raw(&line).await;
            provider.reply(&small, json!({"ok": true})).await;
        };
        let (big, small, _) = tokio::join!(
            client.call_tool("echo", json!({"tag": "big"})),
            client.call_tool("echo", json!({"tag": "small"})),
            serve
        );

        assert!(matches!(big, Err(Error::OutputTooLarge { limit }) if limit == MAX_LINE_SIZE));
        assert_eq!(small.unwrap(), json!({"ok": true}));
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn oversized_reply_without_leading_id_fails_outstanding_calls() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            let request = provider.recv().await;
            let line = format!(
                r#"{{"result":{{"text":"{}"}},"jsonrpc":"2.0","id":{}}}"#,
                huge_text(),
                request["id"]
            );
            provider.send_raw(&line).await;
        };
        let call = tokio::time::timeout(
            Duration::from_secs(5),
            client.call_tool("echo", json!({})),
        );
        let (result, _) = tokio::join!(call, serve);

        assert!(matches!(result, Ok(Err(Error::OutputTooLarge { .. }))));
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn remote_error_is_reported() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            let request = provider.recv().await;
            provider.reply_error(&request, "bad arguments").await;
        };
        let (result, _) = tokio::join!(client.call_tool("echo", json!({})), serve);

        match result {
            Err(Error::Remote(e)) => assert_eq!(e.message, "bad arguments"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncatalogued_tool_is_attempted_then_not_found() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            let request = provider.recv().await;
            assert_eq!(request["params"]["name"], "missing");
            provider.reply_error(&request, "Unknown tool").await;
        };
        let (result, _) = tokio::join!(client.call_tool("missing", json!({})), serve);

        assert!(matches!(result, Err(Error::ToolNotFound(name)) if name == "missing"));
    }

    #[tokio::test]
    async fn garbage_and_stray_ids_are_dropped() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            let request = provider.recv().await;
            provider.send_raw("this is not json").await;
            provider.send_raw("42").await;
            provider
                .send_raw(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#)
                .await;
            provider
                .send_raw(r#"{"jsonrpc":"2.0","id":9999,"result":{"stray":true}}"#)
                .await;
            provider.reply(&request, json!({"ok": true})).await;
        };
        let (result, _) = tokio::join!(client.call_tool("echo", json!({})), serve);

        assert_eq!(result.unwrap(), json!({"ok": true}));
        assert_eq!(client.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn timed_out_request_leaves_no_pending_entry() {
        let (client, mut provider) = ready("fake").await;

        let serve = async {
            provider.recv().await;
        };
        let call = tokio::time::timeout(
            Duration::from_millis(50),
            client.call_tool("echo", json!({})),
        );
        let (result, _) = tokio::join!(call, serve);

        assert!(result.is_err());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_rejects_pending_and_is_idempotent() {
        let (client, mut provider) = ready("fake").await;

        let closer = async {
            provider.recv().await;
            client.close().await;
        };
        let (result, _) = tokio::join!(client.call_tool("echo", json!({})), closer);

        assert!(matches!(result, Err(Error::ChannelClosed)));
        assert!(client.tools().is_empty());
        client.close().await;
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn missing_executable_fails_connect() {
        let client = ToolProviderClient::new(ProviderConfig {
            name: "ghost".into(),
            command: "definitely-not-a-real-provider-binary".into(),
            ..ProviderConfig::default()
        });
        assert!(matches!(client.connect().await, Err(Error::Spawn(_))));
        assert_eq!(client.state(), ClientState::Closed);
    }
}
