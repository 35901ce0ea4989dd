//! Embedded schema migrations.
//!
//! The schema is compiled into the binary as an ordered table of steps.
//! Each step runs inside its own transaction together with its
//! bookkeeping row in `schema_migrations`, so a crash mid-migration
//! leaves nothing recorded and the step re-runs cleanly on the next
//! start.

use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::info;

use super::DatabaseError;

/// One embedded schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub label: &'static str,
    pub sql: &'static str,
}

/// The full schema, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        label: "core ledger",
        sql: include_str!("../../../migrations/001_core_ledger.sql"),
    },
    Migration {
        version: 2,
        label: "review boards",
        sql: include_str!("../../../migrations/002_review_boards.sql"),
    },
    Migration {
        version: 3,
        label: "orchestration memory",
        sql: include_str!("../../../migrations/003_memory.sql"),
    },
];

/// Apply every step not yet recorded; returns how many ran.
pub async fn apply_pending(pool: &SqlitePool) -> Result<usize, DatabaseError> {
    let bookkeeping = |source| DatabaseError::Migration {
        version: 0,
        label: "schema_migrations",
        source,
    };

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            label TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await
    .map_err(bookkeeping)?;

    let done = applied_versions(pool).await?;

    let mut ran = 0;
    for migration in MIGRATIONS.iter().filter(|m| !done.contains(&m.version)) {
        apply_one(pool, migration).await?;
        info!(version = migration.version, label = migration.label, "applied migration");
        ran += 1;
    }
    Ok(ran)
}

/// Versions already recorded in `schema_migrations`.
pub async fn applied_versions(pool: &SqlitePool) -> Result<HashSet<i64>, DatabaseError> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|source| DatabaseError::Migration {
            version: 0,
            label: "schema_migrations",
            source,
        })?;
    Ok(rows.into_iter().map(|(version,)| version).collect())
}

async fn apply_one(pool: &SqlitePool, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |source| DatabaseError::Migration {
        version: migration.version,
        label: migration.label,
        source,
    };

    let mut tx = pool.begin().await.map_err(failed)?;
    sqlx::raw_sql(migration.sql).execute(&mut *tx).await.map_err(failed)?;
    sqlx::query("INSERT INTO schema_migrations (version, label) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.label)
        .execute(&mut *tx)
        .await
        .map_err(failed)?;
    tx.commit().await.map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn raw_memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().filename(":memory:").shared_cache(true))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_applies_everything_once() {
        let pool = raw_memory_pool().await;

        assert_eq!(apply_pending(&pool).await.unwrap(), MIGRATIONS.len());
        assert_eq!(apply_pending(&pool).await.unwrap(), 0);

        let recorded = applied_versions(&pool).await.unwrap();
        assert_eq!(recorded.len(), MIGRATIONS.len());
        assert!(MIGRATIONS.iter().all(|m| recorded.contains(&m.version)));
    }

    #[tokio::test]
    async fn test_versions_are_strictly_ordered_and_unique() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[0].version < window[1].version);
        }
    }
}
