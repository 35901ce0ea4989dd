//! Agent spawner: launches CLI agent subprocesses and tracks their handles.
//!
//! Ids are `<config-name-lower><NNN>`, monotonic per config name and seeded
//! from the ledger so restarts never reuse a live ordinal. Registration is
//! two-phase: the ledger row exists in `pending` before the subprocess is
//! launched, so a crashed spawn always leaves something the presence
//! cleanup can reap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::{AgentConfig, AgentRecord, AgentStatus};
use crate::domain::ports::AgentLedger;
use crate::infrastructure::process;
use crate::services::lifecycle::LifecycleCoordinator;

/// Agent stdout/stderr logs larger than this are rotated at spawn time.
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
/// Grace before SIGKILL on a graceful stop.
const STOP_GRACE: Duration = Duration::from_secs(3);
/// CLI executable launched for each agent.
const DEFAULT_AGENT_BINARY: &str = "claude";

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Unknown agent config: {0}")]
    UnknownConfig(String),

    #[error("Prompt file error: {0}")]
    PromptFile(#[source] std::io::Error),

    #[error("Failed to launch subprocess: {0}")]
    Launch(#[source] std::io::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] DomainError),
}

pub struct AgentSpawner {
    lifecycle: Arc<LifecycleCoordinator>,
    ledger: Arc<dyn AgentLedger>,
    base_path: PathBuf,
    configs: HashMap<String, AgentConfig>,
    counters: Mutex<HashMap<String, u32>>,
    children: Mutex<HashMap<String, Child>>,
}

impl AgentSpawner {
    pub fn new(
        lifecycle: Arc<LifecycleCoordinator>,
        ledger: Arc<dyn AgentLedger>,
        base_path: impl Into<PathBuf>,
        configs: Vec<AgentConfig>,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            base_path: base_path.into(),
            configs: configs.into_iter().map(|c| (c.name.to_lowercase(), c)).collect(),
            counters: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn known_configs(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// Launch an agent from a named config. On spawn failure the id
    /// reservation is released and no half-live record remains.
    pub async fn spawn(
        &self,
        config_name: &str,
        project_path: &str,
        initial_task: Option<&str>,
    ) -> Result<AgentRecord, SpawnError> {
        let config = self
            .configs
            .get(&config_name.to_lowercase())
            .ok_or_else(|| SpawnError::UnknownConfig(config_name.to_string()))?;

        let agent_id = self.next_agent_id(&config.name).await?;
        let record = AgentRecord::new(&agent_id, &config.name)
            .with_project_path(project_path)
            .with_role(&config.role);

        // Phase one: the pending ledger row.
        self.lifecycle.register(record.clone()).await?;

        match self.launch(config, &record, initial_task).await {
            Ok(child) => {
                let pid = child.id();
                self.children.lock().await.insert(agent_id.clone(), child);

                if let Err(e) = self.ledger.set_pid(&agent_id, pid).await {
                    warn!(agent_id, error = %e, "failed to record pid");
                }
                self.lifecycle.set_status(&agent_id, AgentStatus::Starting).await;

                let mut spawned = record;
                spawned.status = AgentStatus::Starting;
                spawned.pid = pid;
                info!(agent_id = %spawned.agent_id, pid, config = %config.name, "agent spawned");
                Ok(spawned)
            }
            Err(e) => {
                // Release the reservation: no half-live record remains.
                if let Err(cleanup) = self.ledger.remove(&agent_id).await {
                    warn!(agent_id, error = %cleanup, "failed to release id reservation");
                }
                self.lifecycle.remove(&agent_id).await;
                Err(e)
            }
        }
    }

    /// Graceful stop: SIGTERM, grace period, then SIGKILL.
    pub async fn stop(&self, agent_id: &str) -> bool {
        let child = self.children.lock().await.remove(agent_id);
        let Some(mut child) = child else {
            // Not ours (restarted server); fall back to the recorded pid.
            return self.stop_by_pid(agent_id).await;
        };

        if let Err(e) = child.start_kill() {
            warn!(agent_id, error = ?e, "failed to signal agent");
        }

        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(agent_id, ?status, "agent exited");
            }
            Ok(Err(e)) => {
                warn!(agent_id, error = ?e, "error waiting for agent exit");
            }
            Err(_) => {
                warn!(agent_id, "stop grace elapsed, force killing");
                let _ = child.kill().await;
            }
        }

        self.lifecycle.mark_stopped(agent_id).await;
        true
    }

    /// Immediate SIGKILL path used by force stop.
    pub async fn force_stop(&self, agent_id: &str) -> bool {
        if let Some(mut child) = self.children.lock().await.remove(agent_id) {
            let _ = child.kill().await;
            self.lifecycle.remove(agent_id).await;
            return true;
        }
        let stopped = self.stop_by_pid(agent_id).await;
        if stopped {
            self.lifecycle.remove(agent_id).await;
        }
        stopped
    }

    async fn stop_by_pid(&self, agent_id: &str) -> bool {
        let record = match self.ledger.get(agent_id).await {
            Ok(Some(record)) => record,
            _ => return false,
        };
        let Some(pid) = record.pid else {
            return false;
        };
        if !process::process_alive(pid) {
            return false;
        }
        process::terminate_with_grace(pid, STOP_GRACE).await;
        self.lifecycle.mark_stopped(agent_id).await;
        true
    }

    /// Reserve the next `<config><NNN>` id for a config name.
    async fn next_agent_id(&self, config_name: &str) -> Result<String, DomainError> {
        let prefix = config_name.to_lowercase();
        let mut counters = self.counters.lock().await;
        let counter = match counters.get_mut(&prefix) {
            Some(counter) => counter,
            None => {
                let seeded = self.ledger.max_ordinal(config_name).await?;
                counters.entry(prefix.clone()).or_insert(seeded)
            }
        };
        *counter += 1;
        Ok(format!("{prefix}{:03}", *counter))
    }

    async fn launch(
        &self,
        config: &AgentConfig,
        record: &AgentRecord,
        initial_task: Option<&str>,
    ) -> Result<Child, SpawnError> {
        let agent_dir = self.base_path.join("agents").join(&record.agent_id);
        std::fs::create_dir_all(&agent_dir).map_err(SpawnError::PromptFile)?;

        let prompt_path = agent_dir.join("prompt.md");
        let prompt = self.render_prompt(config, record, initial_task);
        std::fs::write(&prompt_path, prompt).map_err(SpawnError::PromptFile)?;

        let stdout_path = agent_dir.join("stdout.log");
        let stderr_path = agent_dir.join("stderr.log");
        rotate_log(&stdout_path);
        rotate_log(&stderr_path);
        let stdout = std::fs::File::create(&stdout_path).map_err(SpawnError::Launch)?;
        let stderr = std::fs::File::create(&stderr_path).map_err(SpawnError::Launch)?;

        let mut command = Command::new(DEFAULT_AGENT_BINARY);
        command
            .arg("--model")
            .arg(&config.model)
            .arg("--system-prompt-file")
            .arg(&prompt_path)
            .env("AGENT_ID", &record.agent_id)
            .env("AGENT_ROLE", &config.role)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);

        if !record.project_path.is_empty() {
            command.current_dir(&record.project_path);
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        command.spawn().map_err(SpawnError::Launch)
    }

    fn render_prompt(
        &self,
        config: &AgentConfig,
        record: &AgentRecord,
        initial_task: Option<&str>,
    ) -> String {
        // The template file is optional; a missing one falls back to a
        // minimal role header.
        let template = std::fs::read_to_string(self.base_path.join(&config.prompt_template))
            .or_else(|_| std::fs::read_to_string(&config.prompt_template))
            .unwrap_or_else(|_| format!("You are {}, a {} agent.\n", config.name, config.role));

        let mut prompt = template
            .replace("{{agent_id}}", &record.agent_id)
            .replace("{{role}}", &config.role)
            .replace("{{project_path}}", &record.project_path);

        if let Some(task) = initial_task {
            prompt.push_str("\n## Initial task\n\n");
            prompt.push_str(task);
            prompt.push('\n');
        }
        prompt
    }
}

/// Rename an oversized log aside so the new run starts fresh.
fn rotate_log(path: &Path) {
    if let Ok(metadata) = std::fs::metadata(path) {
        if metadata.len() > LOG_ROTATE_BYTES {
            let rotated = path.with_extension("log.1");
            if let Err(e) = std::fs::rename(path, &rotated) {
                warn!(path = %path.display(), error = %e, "log rotation failed");
            }
        }
    }
}
