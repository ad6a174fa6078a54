//! In-memory tool providers and a fake inference engine for unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp::{PROTOCOL_VERSION, ProcessChannel, ToolProviderClient};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Spin up a provider on duplex pipes and return a connected client.
///
/// `on_call(tool, arguments)` produces the `tools/call` result; returning
/// `None` leaves the request unanswered.
pub(crate) async fn in_memory_provider<F>(
    name: &str,
    tools: Value,
    on_call: F,
) -> Arc<ToolProviderClient>
where
    F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
{
    serve_provider(name, tools, on_call, None).await
}

/// Like [`in_memory_provider`], but the provider goes away as soon as the
/// returned sender is dropped, as if its process had died.
pub(crate) async fn mortal_provider(
    name: &str,
    tools: Value,
) -> (Arc<ToolProviderClient>, oneshot::Sender<()>) {
    let (kill, killed) = oneshot::channel();
    let client = serve_provider(name, tools, |_, _| None, Some(killed)).await;
    (client, kill)
}

async fn serve_provider<F>(
    name: &str,
    tools: Value,
    on_call: F,
    killed: Option<oneshot::Receiver<()>>,
) -> Arc<ToolProviderClient>
where
    F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
{
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(ours);
    let (channel, events) = ProcessChannel::from_pipes(reader, writer);
    let client = Arc::new(ToolProviderClient::with_channel(name, channel, events));

    tokio::spawn(async move {
        let (their_reader, mut their_writer) = tokio::io::split(theirs);
        let mut lines = BufReader::new(their_reader).lines();

        let killed = async move {
            match killed {
                Some(killed) => {
                    let _ = killed.await;
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(killed);

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = &mut killed => break,
            };
            let Ok(Some(line)) = line else { break };
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let Some(id) = message.get("id").cloned() else {
                continue;
            };
            let result = match message["method"].as_str() {
                Some("initialize") => Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                })),
                Some("tools/list") => Some(json!({ "tools": tools.clone() })),
                Some("tools/call") => on_call(
                    message["params"]["name"].as_str().unwrap_or_default(),
                    &message["params"]["arguments"],
                ),
                _ => None,
            };
            if let Some(result) = result {
                let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
                if their_writer
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    });

    client.connect().await.expect("in-memory provider connects");
    client
}

/// A fake inference engine speaking just enough of the HTTP API.
pub(crate) struct FakeEngine {
    addr: SocketAddr,
    state: Arc<FakeEngineState>,
}

#[derive(Default)]
struct FakeEngineState {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Value>>,
    raw: Mutex<Option<Value>>,
    probes: AtomicUsize,
    failing_probes: AtomicUsize,
}

impl FakeEngine {
    /// Serve on an ephemeral port. `replies` are handed out one per chat
    /// request; once exhausted every reply is a plain "done" answer.
    pub(crate) async fn start(replies: Vec<String>) -> Self {
        let state = Arc::new(FakeEngineState {
            replies: Mutex::new(replies.into()),
            ..FakeEngineState::default()
        });
        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/api/chat", post(chat))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub(crate) fn probes(&self) -> usize {
        self.state.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn chat_requests(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub(crate) fn last_request(&self) -> Option<Value> {
        self.state.requests.lock().unwrap().last().cloned()
    }

    /// Answer the next `count` health probes with 503.
    pub(crate) fn fail_probes(&self, count: usize) {
        self.state.failing_probes.store(count, Ordering::SeqCst);
    }

    /// Answer every chat request with this body instead of a completion.
    pub(crate) fn respond_raw(&self, body: Value) {
        *self.state.raw.lock().unwrap() = Some(body);
    }
}

async fn tags(State(state): State<Arc<FakeEngineState>>) -> (StatusCode, Json<Value>) {
    state.probes.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .failing_probes
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "loading" })));
    }
    (StatusCode::OK, Json(json!({ "models": [] })))
}

async fn chat(State(state): State<Arc<FakeEngineState>>, Json(body): Json<Value>) -> Json<Value> {
    state.requests.lock().unwrap().push(body);
    if let Some(raw) = state.raw.lock().unwrap().clone() {
        return Json(raw);
    }
    let content = state
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| json!({"response": "done"}).to_string());
    Json(json!({
        "model": "tiny",
        "message": { "role": "assistant", "content": content },
        "done": true,
    }))
}

/// A URL on which nothing is listening.
pub(crate) async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
