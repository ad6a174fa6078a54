//! Locate and stop stray processes listening on the engine port.
//!
//! Best effort: a missing `lsof`/`netstat` or a failed kill is logged and
//! skipped. The current process is never targeted.

use tokio::process::Command;
use tracing::debug;

/// Kill every other process listening on `port`. Returns the pids killed.
pub async fn reclaim_port(port: u16) -> Vec<u32> {
    let own = std::process::id();
    let mut killed = Vec::new();
    for pid in listeners(port).await {
        if pid == own {
            continue;
        }
        if terminate(pid).await {
            killed.push(pid);
        } else {
            debug!(pid, port, "could not stop listener");
        }
    }
    killed
}

#[cfg(unix)]
async fn listeners(port: u16) -> Vec<u32> {
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-iTCP:{port}"))
        .arg("-sTCP:LISTEN")
        .output()
        .await;
    match output {
        Ok(output) => parse_pid_lines(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            debug!(error = %e, "lsof unavailable");
            Vec::new()
        }
    }
}

#[cfg(unix)]
async fn terminate(pid: u32) -> bool {
    Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

#[cfg(windows)]
async fn listeners(port: u16) -> Vec<u32> {
    match Command::new("netstat").arg("-ano").output().await {
        Ok(output) => parse_netstat(&String::from_utf8_lossy(&output.stdout), port),
        Err(e) => {
            debug!(error = %e, "netstat unavailable");
            Vec::new()
        }
    }
}

#[cfg(windows)]
async fn terminate(pid: u32) -> bool {
    Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .status()
        .await
        .is_ok_and(|status| status.success())
}

#[cfg(not(any(unix, windows)))]
async fn listeners(_port: u16) -> Vec<u32> {
    Vec::new()
}

#[cfg(not(any(unix, windows)))]
async fn terminate(_pid: u32) -> bool {
    false
}

/// One pid per line, as printed by `lsof -t`.
#[cfg_attr(not(unix), allow(dead_code))]
fn parse_pid_lines(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Pids of `LISTENING` rows whose local address ends in `:port`.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_netstat(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let mut pids: Vec<u32> = output
        .lines()
        .filter(|line| line.contains("LISTENING"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            if !local.ends_with(&suffix) {
                return None;
            }
            fields.last()?.parse().ok()
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}
