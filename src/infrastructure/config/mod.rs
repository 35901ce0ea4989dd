//! Configuration loading.

pub mod loader;

pub use loader::{load_projects, load_teams, ConfigError, ConfigLoader};
