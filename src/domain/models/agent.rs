//! Agent domain model.
//!
//! An agent is an OS subprocess running a CLI-driven AI coder, tracked by a
//! stable string id of the form `<config-name-lower><NNN>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered in the ledger, subprocess not yet launched
    Pending,
    /// Subprocess launched, no tool call received yet
    Starting,
    /// First heartbeat or tool call received
    Connected,
    /// Actively executing a task
    Working,
    /// Connected but without a task
    Idle,
    /// Waiting on an external dependency
    Blocked,
    /// Stop approved, graceful shutdown in progress
    Stopping,
    /// Exited cleanly
    Stopped,
    /// Force-killed or reaped
    Dead,
    /// Liveness lost; may recover within the grace window
    Disconnected,
    /// Spawn or runtime failure
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Working => "working",
            Self::Idle => "idle",
            Self::Blocked => "blocked",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Dead => "dead",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "starting" => Some(Self::Starting),
            "connected" => Some(Self::Connected),
            "working" => Some(Self::Working),
            "idle" => Some(Self::Idle),
            "blocked" => Some(Self::Blocked),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "dead" => Some(Self::Dead),
            "disconnected" => Some(Self::Disconnected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Dead | Self::Error)
    }

    /// Statuses protected from presence cleanup regardless of heartbeat age.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Working | Self::Blocked | Self::Starting)
    }

    /// Whether a transition to `next` is admissible.
    pub fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        // Error and Disconnected are reachable from any non-terminal status.
        if matches!(next, Self::Error | Self::Disconnected | Self::Dead) {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Starting),
            Self::Starting => matches!(next, Self::Connected | Self::Stopping),
            Self::Connected => {
                matches!(next, Self::Working | Self::Idle | Self::Blocked | Self::Stopping)
            }
            Self::Working | Self::Idle | Self::Blocked => {
                matches!(next, Self::Working | Self::Idle | Self::Blocked | Self::Stopping)
            }
            Self::Stopping => matches!(next, Self::Stopped),
            Self::Disconnected => {
                // Heartbeat within the grace window restores the prior status.
                matches!(
                    next,
                    Self::Connected | Self::Working | Self::Idle | Self::Blocked | Self::Stopping
                )
            }
            Self::Stopped | Self::Dead | Self::Error => false,
        }
    }
}

/// Ledger record for a spawned agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable id assigned at spawn, e.g. `coder001`
    pub agent_id: String,
    /// Config template that spawned this agent
    pub config_name: String,
    /// Repository the agent operates on
    pub project_path: String,
    /// Role label from the config
    pub role: String,
    /// Lifecycle status
    pub status: AgentStatus,
    /// Free-form display string for the dashboard
    pub current_task: String,
    /// Subprocess pid, when launched
    pub pid: Option<u32>,
    /// Terminal multiplexer pane, when attached
    pub pane_id: Option<String>,
    /// Set once a stop has been approved
    pub shutdown_requested: bool,
    pub spawned_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Create a new pending record. The subprocess has not launched yet.
    pub fn new(agent_id: impl Into<String>, config_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            config_name: config_name.into(),
            project_path: String::new(),
            role: String::new(),
            status: AgentStatus::Pending,
            current_task: String::new(),
            pid: None,
            pane_id: None,
            shutdown_requested: false,
            spawned_at: now,
            last_seen_at: now,
            heartbeat_at: now,
        }
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_path = path.into();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Record a heartbeat, refreshing both liveness timestamps.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_seen_at = now;
        self.heartbeat_at = now;
    }

    /// Age of the last heartbeat in whole seconds.
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.heartbeat_at).num_seconds()
    }
}

/// One agent template from `teams.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub role: String,
    pub model: String,
    /// Path to the prompt template rendered into the per-agent prompt file
    pub prompt_template: String,
    /// Extra environment for the subprocess
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            AgentStatus::Pending,
            AgentStatus::Starting,
            AgentStatus::Connected,
            AgentStatus::Working,
            AgentStatus::Idle,
            AgentStatus::Blocked,
            AgentStatus::Stopping,
            AgentStatus::Stopped,
            AgentStatus::Dead,
            AgentStatus::Disconnected,
            AgentStatus::Error,
        ] {
            assert_eq!(AgentStatus::parse_str(status.as_str()), Some(status));
        }
        assert_eq!(AgentStatus::parse_str("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses_reject_transitions() {
        assert!(!AgentStatus::Stopped.can_transition_to(AgentStatus::Working));
        assert!(!AgentStatus::Dead.can_transition_to(AgentStatus::Error));
        assert!(!AgentStatus::Error.can_transition_to(AgentStatus::Pending));
    }

    #[test]
    fn test_lifecycle_path() {
        assert!(AgentStatus::Pending.can_transition_to(AgentStatus::Starting));
        assert!(AgentStatus::Starting.can_transition_to(AgentStatus::Connected));
        assert!(AgentStatus::Connected.can_transition_to(AgentStatus::Working));
        assert!(AgentStatus::Working.can_transition_to(AgentStatus::Idle));
        assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Blocked));
        assert!(AgentStatus::Blocked.can_transition_to(AgentStatus::Working));
        assert!(AgentStatus::Working.can_transition_to(AgentStatus::Stopping));
        assert!(AgentStatus::Stopping.can_transition_to(AgentStatus::Stopped));
    }

    #[test]
    fn test_transversal_edges() {
        for from in [AgentStatus::Pending, AgentStatus::Working, AgentStatus::Stopping] {
            assert!(from.can_transition_to(AgentStatus::Error));
            assert!(from.can_transition_to(AgentStatus::Disconnected));
        }
    }

    #[test]
    fn test_disconnected_recovers() {
        assert!(AgentStatus::Disconnected.can_transition_to(AgentStatus::Working));
        assert!(AgentStatus::Disconnected.can_transition_to(AgentStatus::Idle));
        assert!(!AgentStatus::Disconnected.can_transition_to(AgentStatus::Pending));
    }

    #[test]
    fn test_active_set() {
        assert!(AgentStatus::Working.is_active());
        assert!(AgentStatus::Blocked.is_active());
        assert!(AgentStatus::Starting.is_active());
        assert!(!AgentStatus::Idle.is_active());
        assert!(!AgentStatus::Pending.is_active());
    }

    #[test]
    fn test_record_touch() {
        let mut record = AgentRecord::new("coder001", "coder");
        let before = record.heartbeat_at;
        record.touch();
        assert!(record.heartbeat_at >= before);
        assert_eq!(record.last_seen_at, record.heartbeat_at);
    }
}
