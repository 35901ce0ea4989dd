//! Single-instance guard.
//!
//! One live server per data directory: a PID file describes the running
//! instance and an exclusive OS lock on `pid.json.lock` arbitrates races.
//! The lock is taken before the PID file is touched so a losing starter
//! can never truncate the winner's record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::models::OnConflict;
use crate::infrastructure::process;

/// How far past the occupied port the scan looks for a free one.
const PORT_SCAN_RANGE: u16 = 20;
/// Health probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Grace allowed for a remote graceful stop before force kill.
const GRACEFUL_STOP_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum GuardError {
    /// Another live instance holds the data directory; exit code 1.
    #[error("Another instance is running on port {port} (pid {pid})")]
    AlreadyRunning { pid: u32, port: u16 },

    /// No free port within the scan range; exit code 1.
    #[error("No free port in {start}..={end}")]
    NoFreePort { start: u16, end: u16 },

    /// Data directory could not be prepared; exit code 3.
    #[error("Data directory inaccessible: {0}")]
    DataDir(#[source] std::io::Error),

    /// Lock or PID file I/O failed; exit code 3.
    #[error("PID file error: {0}")]
    PidFile(#[source] std::io::Error),

    /// Lost the lock race to a concurrent starter; exit code 1.
    #[error("Lock held by another process: {0}")]
    LockHeld(#[source] std::io::Error),
}

impl GuardError {
    /// Process exit code mandated for this failure.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::AlreadyRunning { .. } | Self::NoFreePort { .. } | Self::LockHeld(_) => 1,
            Self::DataDir(_) | Self::PidFile(_) => 3,
        }
    }
}

/// Contents of `pid.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidFileInfo {
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub version: String,
    pub base_path: String,
    pub hostname: String,
}

/// Outcome of conflict resolution.
#[derive(Debug)]
pub enum Resolution {
    /// We own the data directory; serve on this port. `peer_alive` is true
    /// when the other instance keeps running beside us (port policy).
    Proceed { port: u16, peer_alive: bool },
    /// A live instance exists and the policy is to join it; exit 0.
    Connect { url: String },
    /// Policy says stand down; exit 1.
    Exit,
}

/// Result of guard acquisition.
#[derive(Debug)]
pub enum Acquired {
    /// We own the data directory; serve on this port.
    Owned(InstanceGuard, u16),
    /// Policy chose to join the live instance; caller exits 0.
    Connect { url: String },
}

/// Holds the exclusive lock for the server's lifetime. Dropping releases
/// the lock and removes the PID file.
#[derive(Debug)]
pub struct InstanceGuard {
    pid_path: PathBuf,
    lock_path: PathBuf,
    lock_file: Option<File>,
}

impl InstanceGuard {
    /// Resolve any conflict with an existing instance, then take the lock
    /// and write our PID file.
    pub async fn acquire(
        base_path: &Path,
        desired_port: u16,
        policy: OnConflict,
        interactive: bool,
    ) -> Result<Acquired, GuardError> {
        std::fs::create_dir_all(base_path).map_err(GuardError::DataDir)?;
        let pid_path = base_path.join("pid.json");
        let lock_path = base_path.join("pid.json.lock");

        let mut port = desired_port;
        let mut pid_path = pid_path;
        let mut lock_path = lock_path;
        if let Some(existing) = read_pid_file(&pid_path) {
            if is_instance_live(&existing) {
                match resolve_conflict(&existing, desired_port, policy, interactive).await? {
                    Resolution::Proceed { port: chosen, peer_alive } => {
                        port = chosen;
                        if peer_alive {
                            // The peer keeps the canonical PID file and its
                            // lock; coexist under port-scoped names.
                            pid_path = base_path.join(format!("pid.{port}.json"));
                            lock_path = base_path.join(format!("pid.{port}.json.lock"));
                        }
                    }
                    Resolution::Connect { url } => {
                        info!(%url, "joining the live instance");
                        return Ok(Acquired::Connect { url });
                    }
                    Resolution::Exit => {
                        return Err(GuardError::AlreadyRunning {
                            pid: existing.pid,
                            port: existing.port,
                        });
                    }
                }
            } else {
                // Dead or mismatched owner: quietly discard the leftovers.
                let _ = std::fs::remove_file(&pid_path);
            }
        }

        // Take the lock before writing, without truncating: the file may
        // still belong to a daemon that won an earlier race.
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(GuardError::PidFile)?;
        lock_file.try_lock_exclusive().map_err(GuardError::LockHeld)?;

        let info = PidFileInfo {
            pid: std::process::id(),
            port,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            base_path: base_path.display().to_string(),
            hostname: nix::unistd::gethostname()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
        };
        write_pid_file(&pid_path, &info).map_err(GuardError::PidFile)?;

        info!(port, pid = info.pid, "instance guard acquired");
        Ok(Acquired::Owned(Self { pid_path, lock_path, lock_file: Some(lock_file) }, port))
    }

    /// Release the lock and remove the PID file. Also runs on drop; this
    /// exists so signal handlers can release deterministically.
    pub fn release(&mut self) {
        if let Some(lock_file) = self.lock_file.take() {
            let _ = fs2::FileExt::unlock(&lock_file);
            let _ = std::fs::remove_file(&self.pid_path);
            let _ = std::fs::remove_file(&self.lock_path);
            info!("instance guard released");
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid_file(path: &Path) -> Option<PidFileInfo> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "unreadable pid file");
            None
        }
    }
}

fn write_pid_file(path: &Path, info: &PidFileInfo) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&serde_json::to_vec_pretty(info)?)?;
    Ok(())
}

/// A recorded instance counts as live when the pid exists and, where the
/// platform can tell us, its executable name matches ours.
fn is_instance_live(info: &PidFileInfo) -> bool {
    if !process::process_alive(info.pid) {
        return false;
    }
    match (process::executable_name(info.pid), current_executable_name()) {
        // /proc/<pid>/comm truncates to 15 bytes; match on the prefix.
        (Some(theirs), Some(ours)) => ours.starts_with(&theirs),
        _ => true,
    }
}

fn current_executable_name() -> Option<String> {
    std::env::current_exe()
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// GET `/api/health` with a short timeout.
pub async fn probe_health(port: u16) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() else {
        return false;
    };
    match client.get(format!("http://127.0.0.1:{port}/api/health")).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Ask the live instance to stop, wait briefly, then force kill.
pub async fn graceful_stop(info: &PidFileInfo) {
    if let Ok(client) = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        let _ = client
            .post(format!("http://127.0.0.1:{}/api/shutdown", info.port))
            .send()
            .await;
    }

    let deadline = tokio::time::Instant::now() + GRACEFUL_STOP_WAIT;
    while tokio::time::Instant::now() < deadline {
        if !process::process_alive(info.pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    warn!(pid = info.pid, "graceful stop timed out, force killing");
    process::force_kill(info.pid);
}

/// Whether a TCP bind on the port succeeds right now.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Scan upward from `start + 1` for a bindable port.
pub fn find_free_port(start: u16) -> Result<u16, GuardError> {
    let first = start.saturating_add(1);
    let last = start.saturating_add(PORT_SCAN_RANGE);
    for candidate in first..=last {
        if port_available(candidate) {
            return Ok(candidate);
        }
    }
    Err(GuardError::NoFreePort { start: first, end: last })
}

async fn resolve_conflict(
    existing: &PidFileInfo,
    desired_port: u16,
    policy: OnConflict,
    interactive: bool,
) -> Result<Resolution, GuardError> {
    let healthy = probe_health(existing.port).await;
    info!(
        pid = existing.pid,
        port = existing.port,
        healthy,
        "live instance detected"
    );

    if interactive && console::Term::stdout().is_term() {
        return interactive_menu(existing).await;
    }

    match policy {
        OnConflict::Exit => Ok(Resolution::Exit),
        OnConflict::Connect => Ok(Resolution::Connect {
            url: format!("http://127.0.0.1:{}", existing.port),
        }),
        OnConflict::Kill => {
            graceful_stop(existing).await;
            Ok(Resolution::Proceed { port: desired_port, peer_alive: false })
        }
        OnConflict::Port => {
            let base = desired_port.max(existing.port);
            Ok(Resolution::Proceed { port: find_free_port(base)?, peer_alive: true })
        }
    }
}

async fn interactive_menu(existing: &PidFileInfo) -> Result<Resolution, GuardError> {
    let term = console::Term::stdout();
    let _ = term.write_line(&format!(
        "An instance is already running (pid {}, port {}).",
        existing.pid, existing.port
    ));
    let _ = term.write_line("  [c] connect to it");
    let _ = term.write_line("  [s] stop it gracefully and take over");
    let _ = term.write_line("  [p] start on a different port");
    let _ = term.write_line("  [k] force kill it and take over");
    let _ = term.write_line("  [e] exit");

    let choice = term.read_line().unwrap_or_default();
    match choice.trim().to_lowercase().as_str() {
        "c" => Ok(Resolution::Connect { url: format!("http://127.0.0.1:{}", existing.port) }),
        "s" => {
            graceful_stop(existing).await;
            Ok(Resolution::Proceed { port: existing.port, peer_alive: false })
        }
        "p" => Ok(Resolution::Proceed { port: find_free_port(existing.port)?, peer_alive: true }),
        "k" => {
            process::force_kill(existing.pid);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Resolution::Proceed { port: existing.port, peer_alive: false })
        }
        _ => Ok(Resolution::Exit),
    }
}
