//! Server configuration model.
//!
//! Loaded hierarchically by `infrastructure::config::ConfigLoader`; the
//! team and project files are separate YAML documents.

use serde::{Deserialize, Serialize};

use super::agent::AgentConfig;

/// Policy applied when another live instance is detected non-interactively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnConflict {
    /// Exit with code 1 (default)
    Exit,
    /// Force-kill the other instance and take over
    Kill,
    /// Scan upward for a free port
    Port,
    /// Print the live instance URL and exit 0
    Connect,
}

impl Default for OnConflict {
    fn default() -> Self {
        Self::Exit
    }
}

impl OnConflict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Kill => "kill",
            Self::Port => "port",
            Self::Connect => "connect",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exit" => Some(Self::Exit),
            "kill" => Some(Self::Kill),
            "port" => Some(Self::Port),
            "connect" => Some(Self::Connect),
            _ => None,
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "memory.db".to_string(), max_connections: 5 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

/// Presence subsystem settings; all intervals in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub check_interval: u64,
    pub stale_threshold: u64,
    pub pending_threshold: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { check_interval: 30, stale_threshold: 120, pending_threshold: 60 }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP port the external transport binds; recorded in the PID file
    pub port: u16,
    /// Data directory: state.json, memory.db, pid.json, agents/
    pub base_path: String,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub presence: PresenceConfig,
    /// Rework rounds before forced escalation
    pub max_review_cycles: u32,
    /// Per-subscription event queue capacity
    pub event_bus_buffer: usize,
    /// Default `wait_for_events` timeout in seconds
    pub approval_timeout: u64,
    /// Durable event retention in hours
    pub event_retention_hours: u64,
    pub on_conflict: OnConflict,
    /// Path to the teams YAML, relative to the config directory
    pub teams_file: String,
    /// Path to the projects YAML, relative to the config directory
    pub projects_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9000,
            base_path: ".cliaimonitor".to_string(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            presence: PresenceConfig::default(),
            max_review_cycles: 3,
            event_bus_buffer: 256,
            approval_timeout: 60,
            event_retention_hours: 168,
            on_conflict: OnConflict::default(),
            teams_file: "teams.yaml".to_string(),
            projects_file: "projects.yaml".to_string(),
        }
    }
}

/// The teams document: agent templates available to the spawner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamsFile {
    pub teams: Teams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Teams {
    pub agents: Vec<AgentConfig>,
}

/// The projects document: repositories agents may be pointed at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectsFile {
    pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
}
