//! SQLite adapters for the durable storage plane.
//!
//! The database is always a single file under the server's data
//! directory (or in-memory for tests), opened in WAL mode with foreign
//! keys on. Writes are short and funnel through the services, so the
//! pool stays small; readers share WAL snapshots.

pub mod agent_ledger;
pub mod assignment_repository;
pub mod event_store;
pub mod memory_repository;
pub mod migrations;
pub mod review_repository;
pub mod task_repository;

pub use agent_ledger::SqliteAgentLedger;
pub use assignment_repository::SqliteAssignmentRepository;
pub use event_store::SqliteEventStore;
pub use memory_repository::SqliteMemoryRepository;
pub use migrations::{apply_pending, Migration, MIGRATIONS};
pub use review_repository::SqliteReviewRepository;
pub use task_repository::SqliteTaskRepository;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};

/// Errors raised while opening or migrating the database.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Cannot prepare database directory {path}: {source}")]
    Directory { path: String, #[source] source: std::io::Error },

    #[error("Cannot open database {path}: {source}")]
    Open { path: String, #[source] source: sqlx::Error },

    #[error("Migration {version} ({label}) failed: {source}")]
    Migration { version: i64, label: &'static str, #[source] source: sqlx::Error },
}

/// Base connect options shared by the file-backed and in-memory paths.
fn connect_options() -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30))
}

/// Open (creating if needed) the database file and bring its schema up
/// to date.
pub async fn initialize_database(
    path: &Path,
    max_connections: u32,
) -> Result<SqlitePool, DatabaseError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options().filename(path).create_if_missing(true))
        .await
        .map_err(|source| DatabaseError::Open { path: path.display().to_string(), source })?;

    apply_pending(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema applied, for tests.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options().filename(":memory:").shared_cache(true))
        .await
        .map_err(|source| DatabaseError::Open { path: ":memory:".to_string(), source })?;

    apply_pending(&pool).await?;
    Ok(pool)
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> DomainResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|opt| opt.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_creates_file_and_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.db");

        let pool = initialize_database(&path, 4).await.unwrap();
        assert!(path.exists());

        // The schema is queryable immediately.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);

        // Reopening the same file is idempotent.
        drop(pool);
        initialize_database(&path, 4).await.unwrap();
    }
}
