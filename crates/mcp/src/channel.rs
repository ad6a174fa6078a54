//! Line-delimited pipe channel to a provider process.
//!
//! The channel has no protocol knowledge. It writes newline-terminated
//! messages to the child's stdin and reports what comes back as
//! [`ChannelEvent`]s: complete stdout lines, stderr diagnostics, and a single
//! terminal [`ChannelEvent::Exited`] once stdout reaches end of stream.
//! A line longer than [`MAX_LINE_SIZE`] is never buffered whole; it is
//! skipped and reported as [`ChannelEvent::Overflow`].

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Maximum accepted line size (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// How much of an oversized line is kept for [`ChannelEvent::Overflow`].
pub const OVERFLOW_HEAD: usize = 256;

const READ_CHUNK: usize = 8 * 1024;

/// How long to wait for an exit status after stdout closes.
const EXIT_GRACE: Duration = Duration::from_secs(1);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Something the far side of a channel produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One complete stdout line, terminator stripped.
    Line(String),
    /// One stderr line. Diagnostic only, never protocol data.
    Diagnostic(String),
    /// A stdout line exceeded [`MAX_LINE_SIZE`] and was discarded.
    /// Carries its first [`OVERFLOW_HEAD`] bytes.
    Overflow(String),
    /// The process went away. Always the last event.
    Exited(Option<i32>),
}

pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Owns one spawned child process and its pipes.
pub struct ProcessChannel {
    writer: Mutex<Option<Writer>>,
    child: Arc<Mutex<Option<Child>>>,
    closed: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl ProcessChannel {
    /// Spawn `command` with all three standard streams piped.
    pub fn spawn(
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<(Self, ChannelEvents)> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(Error::Spawn)?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stderr")))?;

        debug!(command, ?args, ?pid, "spawned provider process");

        let (tx, rx) = mpsc::unbounded_channel();
        let child = Arc::new(Mutex::new(Some(child)));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump_stderr(stderr, tx.clone()));
        tokio::spawn(pump_stdout(stdout, tx, closed.clone(), Some(child.clone())));

        Ok((
            Self {
                writer: Mutex::new(Some(Box::new(stdin))),
                child,
                closed,
                pid,
            },
            rx,
        ))
    }

    /// Wire a channel over already-open pipes, with no child process.
    ///
    /// End of stream on `reader` is reported as `Exited(None)`.
    pub fn from_pipes<R, W>(reader: R, writer: W) -> (Self, ChannelEvents)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(pump_stdout(reader, tx, closed.clone(), None));
        (
            Self {
                writer: Mutex::new(Some(Box::new(writer))),
                child: Arc::new(Mutex::new(None)),
                closed,
                pid: None,
            },
            rx,
        )
    }

    /// OS process id, when the channel owns a process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one message followed by a newline.
    pub async fn send(&self, message: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::ChannelClosed)?;
        let written = async {
            writer.write_all(message.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            debug!(error = %e, "write to provider failed");
            *guard = None;
            self.closed.store(true, Ordering::SeqCst);
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Close stdin and kill the process. Safe to call more than once.
    pub async fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.writer.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "provider process already gone");
            }
        }
    }
}

async fn pump_stdout<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<ChannelEvent>,
    closed: Arc<AtomicBool>,
    child: Option<Arc<Mutex<Option<Child>>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut codec = LinesCodec::new_with_max_length(MAX_LINE_SIZE);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    'read: loop {
        loop {
            let event = match codec.decode(&mut buf) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => ChannelEvent::Line(line),
                Ok(None) => break,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    // The codec keeps the start of the line buffered until
                    // the next decode call starts discarding it.
                    let head = &buf[..buf.len().min(OVERFLOW_HEAD)];
                    warn!(max = MAX_LINE_SIZE, "discarding oversized line");
                    ChannelEvent::Overflow(String::from_utf8_lossy(head).into_owned())
                }
                Err(LinesCodecError::Io(e)) => {
                    warn!(error = %e, "dropping undecodable line");
                    continue;
                }
            };
            if tx.send(event).is_err() {
                break 'read;
            }
        }

        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                if !buf.is_empty() {
                    debug!(bytes = buf.len(), "discarding unterminated output at end of stream");
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "provider stdout read failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);

    let code = match child {
        Some(child) => exit_code(&child).await,
        None => None,
    };
    let _ = tx.send(ChannelEvent::Exited(code));
}

async fn pump_stderr<R>(reader: R, tx: mpsc::UnboundedSender<ChannelEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(ChannelEvent::Diagnostic(line)).is_err() {
            break;
        }
    }
}

async fn exit_code(child: &Mutex<Option<Child>>) -> Option<i32> {
    let mut guard = child.lock().await;
    let child = guard.as_mut()?;
    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        _ => None,
    }
}
