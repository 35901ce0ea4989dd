//! SQLite event journal: durable append + cursor replay for the bus.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Event, EventPriority, EventType, TARGET_ALL};
use crate::domain::ports::{EventStore, ReplayedEvent};

#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, event: &Event) -> DomainResult<i64> {
        let payload = serde_json::to_string(&event.payload)?;
        let result = sqlx::query(
            r#"INSERT INTO events (event_id, event_type, source, target, priority, payload, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&event.event_id)
        .bind(event.event_type.as_str())
        .bind(&event.source)
        .bind(&event.target)
        .bind(event.priority.as_str())
        .bind(&payload)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn replay_since(
        &self,
        cursor: i64,
        target: Option<&str>,
        limit: u32,
    ) -> DomainResult<Vec<ReplayedEvent>> {
        let rows: Vec<EventRow> = if let Some(target) = target {
            sqlx::query_as(
                r#"SELECT * FROM events WHERE sequence > ? AND (target = ? OR target = ?)
                   ORDER BY sequence LIMIT ?"#,
            )
            .bind(cursor)
            .bind(target)
            .bind(TARGET_ALL)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT * FROM events WHERE sequence > ? ORDER BY sequence LIMIT ?")
                .bind(cursor)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn latest_sequence(&self) -> DomainResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM events")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| s).unwrap_or(0))
    }

    async fn count(&self) -> DomainResult<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM events WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    sequence: i64,
    event_id: String,
    event_type: String,
    source: String,
    target: String,
    priority: String,
    payload: String,
    created_at: String,
}

impl TryFrom<EventRow> for ReplayedEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = EventType::parse_str(&row.event_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid event type: {}", row.event_type)))?;
        let priority = EventPriority::parse_str(&row.priority)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid priority: {}", row.priority)))?;

        Ok(ReplayedEvent {
            sequence: row.sequence,
            event: Event {
                event_id: row.event_id,
                event_type,
                source: row.source,
                target: row.target,
                priority,
                payload: serde_json::from_str(&row.payload)?,
                created_at: super::parse_datetime(&row.created_at)?,
            },
        })
    }
}
