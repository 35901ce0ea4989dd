//! CLIAIMONITOR - multi-agent orchestration server core
//!
//! Spawns interactive CLI AI agents as subprocesses, tracks their
//! lifecycle across three storage planes (in-memory dashboard state, a
//! SQLite memory database, and live OS processes), routes messages
//! through a single Captain coordinator, and gates every agent exit
//! behind supervisor approval.

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod tools;

pub use application::Server;
pub use domain::errors::{DomainError, DomainResult};
