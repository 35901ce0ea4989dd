//! Authoritative in-memory dashboard state with periodic disk snapshots.
//!
//! All writes pass through one mutex; readers get clones. Mutations mark a
//! dirty flag consumed by a single background writer task, which debounces
//! and writes `state.json` atomically. Request handlers never touch the
//! file directly.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::models::DashboardState;

/// Delay between the first dirty mark and the snapshot write, so bursts of
/// updates coalesce into one write.
const SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct StateStore {
    state: Mutex<DashboardState>,
    snapshot_path: PathBuf,
    dirty_tx: mpsc::UnboundedSender<()>,
    dirty_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    generation: AtomicU64,
    changes: watch::Sender<u64>,
}

impl StateStore {
    /// Load the snapshot if present; corrupt or missing files yield an
    /// empty state with a warning, never a failure.
    pub fn open(snapshot_path: impl Into<PathBuf>) -> Arc<Self> {
        let snapshot_path = snapshot_path.into();
        let state = load_snapshot(&snapshot_path);
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        let (changes, _) = watch::channel(0);

        Arc::new(Self {
            state: Mutex::new(state),
            snapshot_path,
            dirty_tx,
            dirty_rx: Mutex::new(Some(dirty_rx)),
            generation: AtomicU64::new(0),
            changes,
        })
    }

    /// Spawn the single snapshot writer. Call once after `open`.
    pub fn spawn_snapshot_writer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let mut rx = store
            .dirty_rx
            .lock()
            .expect("state store poisoned")
            .take()
            .expect("snapshot writer already spawned");

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                tokio::time::sleep(SNAPSHOT_DEBOUNCE).await;
                // Coalesce every mark that arrived during the debounce.
                while rx.try_recv().is_ok() {}
                store.write_snapshot();
            }
            debug!("snapshot writer stopped");
        })
    }

    /// Apply a mutation under the lock, then notify subscribers after the
    /// lock is released so they observe a consistent snapshot.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut DashboardState) -> R) -> R {
        let result = {
            let mut state = self.state.lock().expect("state store poisoned");
            mutate(&mut state)
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.dirty_tx.send(());
        let _ = self.changes.send(generation);
        result
    }

    /// Read through a closure; anything escaping must be cloned.
    pub fn read<R>(&self, read: impl FnOnce(&DashboardState) -> R) -> R {
        let state = self.state.lock().expect("state store poisoned");
        read(&state)
    }

    /// Defensive copy of the full dashboard state.
    pub fn snapshot(&self) -> DashboardState {
        self.read(Clone::clone)
    }

    /// Change notifications: the value is a monotonically increasing
    /// generation counter.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Synchronous write, used on clean shutdown.
    pub fn flush(&self) {
        self.write_snapshot();
    }

    fn write_snapshot(&self) {
        let state = self.snapshot();
        match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(&self.snapshot_path, &bytes) {
                    warn!(error = %e, path = %self.snapshot_path.display(), "failed to write snapshot");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize dashboard state"),
        }
    }
}

fn load_snapshot(path: &Path) -> DashboardState {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(state) => {
                info!(path = %path.display(), "loaded dashboard snapshot");
                state
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "corrupt snapshot, starting empty");
                DashboardState::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("no snapshot found, starting with empty state");
            DashboardState::default()
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "unreadable snapshot, starting empty");
            DashboardState::default()
        }
    }
}

/// Write via a sibling temp file and rename, so readers never observe a
/// partial snapshot.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
