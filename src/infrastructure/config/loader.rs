use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{Config, ProjectsFile, TeamsFile};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port: 0")]
    InvalidPort,

    #[error("Base path cannot be empty")]
    EmptyBasePath,

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid check_interval: 0. Must be at least 1 second")]
    InvalidCheckInterval,

    #[error("Invalid stale_threshold: {0}. Must exceed check_interval {1}")]
    InvalidStaleThreshold(u64, u64),

    #[error("Invalid max_review_cycles: 0. Must be at least 1")]
    InvalidMaxReviewCycles,

    #[error("Invalid event_bus_buffer: 0. Must be at least 1")]
    InvalidEventBusBuffer,

    #[error("Invalid approval_timeout: {0}. Hard cap is 300 seconds")]
    InvalidApprovalTimeout(u64),

    #[error("Teams file error: {0}")]
    TeamsFile(String),

    #[error("Projects file error: {0}")]
    ProjectsFile(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .cliaimonitor/config.yaml (project config)
    /// 3. .cliaimonitor/local.yaml (local overrides, optional)
    /// 4. Environment variables (CLIAIMONITOR_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".cliaimonitor/config.yaml"))
            .merge(Yaml::file(".cliaimonitor/local.yaml"))
            .merge(Env::prefixed("CLIAIMONITOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CLIAIMONITOR_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if config.base_path.is_empty() {
            return Err(ConfigError::EmptyBasePath);
        }
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.presence.check_interval == 0 {
            return Err(ConfigError::InvalidCheckInterval);
        }
        if config.presence.stale_threshold <= config.presence.check_interval {
            return Err(ConfigError::InvalidStaleThreshold(
                config.presence.stale_threshold,
                config.presence.check_interval,
            ));
        }
        if config.max_review_cycles == 0 {
            return Err(ConfigError::InvalidMaxReviewCycles);
        }
        if config.event_bus_buffer == 0 {
            return Err(ConfigError::InvalidEventBusBuffer);
        }
        if config.approval_timeout == 0 || config.approval_timeout > 300 {
            return Err(ConfigError::InvalidApprovalTimeout(config.approval_timeout));
        }

        Ok(())
    }
}

/// Load the teams YAML enumerating spawnable agent templates.
pub fn load_teams(path: impl AsRef<Path>) -> Result<TeamsFile, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ConfigError::TeamsFile(format!("{}: {e}", path.as_ref().display())))?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::TeamsFile(e.to_string()))
}

/// Load the projects YAML enumerating target repositories.
pub fn load_projects(path: impl AsRef<Path>) -> Result<ProjectsFile, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ConfigError::ProjectsFile(format!("{}: {e}", path.as_ref().display())))?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::ProjectsFile(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.port, 9000);
        assert_eq!(config.presence.check_interval, 30);
        assert_eq!(config.max_review_cycles, 3);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
port: 9100
base_path: /var/lib/cliaimonitor
presence:
  check_interval: 15
  stale_threshold: 90
  pending_threshold: 45
max_review_cycles: 5
on_conflict: port
logging:
  level: debug
  format: json
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.port, 9100);
        assert_eq!(config.presence.check_interval, 15);
        assert_eq!(config.max_review_cycles, 5);
        assert_eq!(config.on_conflict, crate::domain::models::OnConflict::Port);
        assert_eq!(config.logging.format, "json");
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = Config { port: 0, ..Default::default() };
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidPort)));
    }

    #[test]
    fn test_validate_rejects_stale_below_interval() {
        let mut config = Config::default();
        config.presence.check_interval = 60;
        config.presence.stale_threshold = 30;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidStaleThreshold(30, 60))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_validate_caps_approval_timeout() {
        let config = Config { approval_timeout: 600, ..Default::default() };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidApprovalTimeout(600))
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "port: 9001\nlogging:\n  level: info\n  format: json").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "port: 9002\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.port, 9002, "Override should win");
        assert_eq!(config.logging.level, "debug", "Override should win for nested fields");
        assert_eq!(config.logging.format, "json", "Base value should persist when not overridden");
    }

    #[test]
    fn test_load_teams_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "teams:\n  agents:\n    - name: coder\n      role: implementation\n      model: sonnet\n      prompt_template: prompts/coder.md"
        )
        .unwrap();
        file.flush().unwrap();

        let teams = load_teams(file.path()).unwrap();
        assert_eq!(teams.teams.agents.len(), 1);
        assert_eq!(teams.teams.agents[0].name, "coder");
    }

    #[test]
    fn test_missing_teams_file_errors() {
        let err = load_teams("/nonexistent/teams.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::TeamsFile(_)));
    }
}
