//! Lifecycle of the inference engine process.

use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{ChatEngine, EngineClient, EngineConfig, reclaim_port};
use crate::message::Message;
use crate::{Error, Result};

const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_ATTEMPTS: u32 = 10;
const MAX_RETRIES: u32 = 3;

/// Engine availability as last observed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineProcessState {
    Stopped,
    Starting,
    Running,
    Unhealthy,
}

impl fmt::Display for EngineProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Sole owner of the engine process.
///
/// `ensure_running` is serialised on the process handle, so concurrent
/// callers never launch two instances.
pub struct EngineSupervisor {
    config: EngineConfig,
    client: EngineClient,
    state: Mutex<EngineProcessState>,
    process: tokio::sync::Mutex<Option<Child>>,
    probe_interval: Duration,
    probe_attempts: u32,
    max_retries: u32,
    #[cfg(test)]
    transitions: Mutex<Vec<EngineProcessState>>,
}

impl EngineSupervisor {
    pub fn new(config: EngineConfig) -> Self {
        let client = EngineClient::new(&config);
        Self {
            config,
            client,
            state: Mutex::new(EngineProcessState::Stopped),
            process: tokio::sync::Mutex::new(None),
            probe_interval: PROBE_INTERVAL,
            probe_attempts: PROBE_ATTEMPTS,
            max_retries: MAX_RETRIES,
            #[cfg(test)]
            transitions: Mutex::new(Vec::new()),
        }
    }

    /// Override the startup polling schedule.
    pub fn with_probe_schedule(mut self, interval: Duration, attempts: u32) -> Self {
        self.probe_interval = interval;
        self.probe_attempts = attempts.max(1);
        self
    }

    /// Restarts allowed per request after a connection failure.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn state(&self) -> EngineProcessState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pid of the engine process this supervisor launched, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(Child::id)
    }

    /// Make sure the engine answers its health probe, launching it if needed.
    pub async fn ensure_running(&self) -> Result<()> {
        let mut process = self.process.lock().await;

        if self.state() == EngineProcessState::Running {
            if self.client.probe().await {
                return Ok(());
            }
            warn!(url = %self.client.base_url(), "engine stopped answering health probes");
            self.set_state(EngineProcessState::Unhealthy);
        }

        self.set_state(EngineProcessState::Starting);

        if !self.config.managed {
            return match self.await_healthy(None).await {
                Ok(()) => {
                    self.set_state(EngineProcessState::Running);
                    Ok(())
                }
                Err(e) => {
                    self.set_state(EngineProcessState::Stopped);
                    Err(e)
                }
            };
        }

        if let Some(mut stale) = process.take() {
            debug!(pid = ?stale.id(), "stopping stale engine instance");
            if let Err(e) = stale.kill().await {
                debug!(error = %e, "stale engine already gone");
            }
        }
        self.reclaim_strays().await;

        let mut child = match self.launch() {
            Ok(child) => child,
            Err(e) => {
                self.set_state(EngineProcessState::Stopped);
                return Err(e);
            }
        };

        match self.await_healthy(Some(&mut child)).await {
            Ok(()) => {
                info!(pid = ?child.id(), url = %self.client.base_url(), "inference engine running");
                *process = Some(child);
                self.set_state(EngineProcessState::Running);
                Ok(())
            }
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "engine exited before it could be stopped");
                }
                self.set_state(EngineProcessState::Stopped);
                Err(e)
            }
        }
    }

    /// Send a chat request, restarting the engine on connection failures.
    ///
    /// Gives up with [`Error::EngineUnavailable`] once the retry budget is
    /// spent; the next call starts over with a fresh budget.
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = match self.ensure_running().await {
                Ok(()) => self.client.chat(messages).await,
                Err(e) => Err(e),
            };

            let error = match outcome {
                Ok(reply) => return Ok(reply),
                Err(error @ Error::Connect(_)) => {
                    self.set_state(EngineProcessState::Unhealthy);
                    error
                }
                Err(error @ Error::EngineStartFailed(_)) => error,
                Err(other) => return Err(other),
            };

            if attempts > self.max_retries {
                return Err(Error::EngineUnavailable {
                    attempts,
                    reason: error.to_string(),
                });
            }
            warn!(attempt = attempts, %error, "engine unreachable, retrying");
        }
    }

    /// Stop the managed instance and reclaim the engine port.
    pub async fn shutdown(&self) {
        let mut process = self.process.lock().await;
        if let Some(mut child) = process.take() {
            info!(pid = ?child.id(), "stopping inference engine");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "engine already exited");
            }
        }
        self.reclaim_strays().await;
        self.set_state(EngineProcessState::Stopped);
    }

    /// Tear down whatever is serving the engine port and start over.
    pub async fn reset(&self) -> Result<()> {
        self.shutdown().await;
        self.ensure_running().await
    }

    fn launch(&self) -> Result<Child> {
        let launch = &self.config.launch;
        info!(command = %launch.command, args = ?launch.args, "starting inference engine");

        let mut child = Command::new(&launch.command)
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::EngineStartFailed(format!("{}: {e}", launch.command)))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "engine", "{line}");
                }
            });
        }
        Ok(child)
    }

    /// Poll the health probe until it answers or the attempt ceiling is hit.
    async fn await_healthy(&self, mut child: Option<&mut Child>) -> Result<()> {
        for attempt in 1..=self.probe_attempts {
            tokio::time::sleep(self.probe_interval).await;
            if self.client.probe().await {
                return Ok(());
            }
            debug!(attempt, max = self.probe_attempts, "waiting for engine");

            if let Some(child) = child.as_deref_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(Error::EngineStartFailed(format!(
                        "engine exited during startup ({status})"
                    )));
                }
            }
        }
        Err(Error::EngineStartFailed(format!(
            "{} not responding after {} attempts",
            self.client.base_url(),
            self.probe_attempts
        )))
    }

    async fn reclaim_strays(&self) {
        if !(self.config.managed && self.config.reclaim_stray) {
            return;
        }
        if let Some(port) = self.config.port() {
            let killed = reclaim_port(port).await;
            if !killed.is_empty() {
                warn!(port, ?killed, "killed stray engine processes");
            }
        }
    }

    fn set_state(&self, next: EngineProcessState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!(from = %*state, to = %next, "engine state");
            *state = next;
            #[cfg(test)]
            self.transitions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(next);
        }
    }

    #[cfg(test)]
    fn take_transitions(&self) -> Vec<EngineProcessState> {
        std::mem::take(&mut *self.transitions.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl ChatEngine for EngineSupervisor {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.chat(messages).await
    }
}
