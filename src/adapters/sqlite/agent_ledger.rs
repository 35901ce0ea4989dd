//! SQLite implementation of the AgentLedger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentRecord, AgentStatus};
use crate::domain::ports::AgentLedger;

#[derive(Clone)]
pub struct SqliteAgentLedger {
    pool: SqlitePool,
}

impl SqliteAgentLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentLedger for SqliteAgentLedger {
    async fn register(&self, record: &AgentRecord) -> DomainResult<()> {
        // At most one non-terminal row may exist per agent_id. A terminal
        // row with the same id is revived in place.
        let existing: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE agent_id = ?")
            .bind(&record.agent_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = existing {
            let status = AgentStatus::parse_str(&row.status)
                .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
            if !status.is_terminal() {
                return Err(DomainError::Conflict(format!(
                    "agent {} already registered with status {}",
                    record.agent_id, row.status
                )));
            }
            sqlx::query("DELETE FROM agents WHERE agent_id = ?")
                .bind(&record.agent_id)
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"INSERT INTO agents (agent_id, config_name, project_path, role, status,
               current_task, pid, pane_id, shutdown_requested, spawned_at, last_seen_at, heartbeat_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.agent_id)
        .bind(&record.config_name)
        .bind(&record.project_path)
        .bind(&record.role)
        .bind(record.status.as_str())
        .bind(&record.current_task)
        .bind(record.pid.map(i64::from))
        .bind(record.pane_id.as_deref())
        .bind(i32::from(record.shutdown_requested))
        .bind(record.spawned_at.to_rfc3339())
        .bind(record.last_seen_at.to_rfc3339())
        .bind(record.heartbeat_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentRecord>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_all(&self) -> DomainResult<Vec<AgentRecord>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents ORDER BY spawned_at")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_status(&self, status: AgentStatus) -> DomainResult<Vec<AgentRecord>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE status = ? ORDER BY spawned_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status(&self, agent_id: &str, status: AgentStatus) -> DomainResult<()> {
        let result = sqlx::query("UPDATE agents SET status = ?, last_seen_at = ? WHERE agent_id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        let result =
            sqlx::query("UPDATE agents SET heartbeat_at = ?, last_seen_at = ? WHERE agent_id = ?")
                .bind(at.to_rfc3339())
                .bind(at.to_rfc3339())
                .bind(agent_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn set_pid(&self, agent_id: &str, pid: Option<u32>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE agents SET pid = ? WHERE agent_id = ?")
            .bind(pid.map(i64::from))
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn set_current_task(&self, agent_id: &str, task: &str) -> DomainResult<()> {
        let result = sqlx::query("UPDATE agents SET current_task = ? WHERE agent_id = ?")
            .bind(task)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn set_shutdown_requested(&self, agent_id: &str, requested: bool) -> DomainResult<()> {
        let result = sqlx::query("UPDATE agents SET shutdown_requested = ? WHERE agent_id = ?")
            .bind(i32::from(requested))
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<AgentRecord>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE heartbeat_at < ? AND status NOT IN ('stopped', 'dead', 'error')",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_orphans(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<AgentRecord>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE status = 'pending' AND spawned_at < ?")
                .bind(cutoff.to_rfc3339())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_stopped(&self, agent_id: &str) -> DomainResult<()> {
        self.update_status(agent_id, AgentStatus::Stopped).await
    }

    async fn mark_dead(&self, agent_id: &str) -> DomainResult<()> {
        self.update_status(agent_id, AgentStatus::Dead).await
    }

    async fn remove(&self, agent_id: &str) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM agents WHERE agent_id = ?")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id.to_string()));
        }
        Ok(())
    }

    async fn max_ordinal(&self, config_name: &str) -> DomainResult<u32> {
        let ids: Vec<(String,)> = sqlx::query_as("SELECT agent_id FROM agents WHERE config_name = ?")
            .bind(config_name)
            .fetch_all(&self.pool)
            .await?;

        let prefix = config_name.to_lowercase();
        let max = ids
            .iter()
            .filter_map(|(id,)| id.strip_prefix(&prefix))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .unwrap_or(0);

        Ok(max)
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    agent_id: String,
    config_name: String,
    project_path: String,
    role: String,
    status: String,
    current_task: String,
    pid: Option<i64>,
    pane_id: Option<String>,
    shutdown_requested: i32,
    spawned_at: String,
    last_seen_at: String,
    heartbeat_at: String,
}

impl TryFrom<AgentRow> for AgentRecord {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let status = AgentStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        Ok(AgentRecord {
            agent_id: row.agent_id,
            config_name: row.config_name,
            project_path: row.project_path,
            role: row.role,
            status,
            current_task: row.current_task,
            pid: row.pid.and_then(|p| u32::try_from(p).ok()),
            pane_id: row.pane_id,
            shutdown_requested: row.shutdown_requested != 0,
            spawned_at: super::parse_datetime(&row.spawned_at)?,
            last_seen_at: super::parse_datetime(&row.last_seen_at)?,
            heartbeat_at: super::parse_datetime(&row.heartbeat_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Duration;

    async fn setup_ledger() -> SqliteAgentLedger {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteAgentLedger::new(pool)
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let ledger = setup_ledger().await;
        let record = AgentRecord::new("coder001", "coder").with_role("implementation");
        ledger.register(&record).await.unwrap();

        let found = ledger.get("coder001").await.unwrap().unwrap();
        assert_eq!(found.config_name, "coder");
        assert_eq!(found.status, AgentStatus::Pending);
        assert_eq!(found.role, "implementation");
    }

    #[tokio::test]
    async fn test_register_conflict_when_live() {
        let ledger = setup_ledger().await;
        let record = AgentRecord::new("coder001", "coder");
        ledger.register(&record).await.unwrap();

        let err = ledger.register(&record).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_revives_terminal_row() {
        let ledger = setup_ledger().await;
        let record = AgentRecord::new("coder001", "coder");
        ledger.register(&record).await.unwrap();
        ledger.mark_dead("coder001").await.unwrap();

        // Same id can be reused once the old incarnation is terminal.
        ledger.register(&record).await.unwrap();
        let found = ledger.get("coder001").await.unwrap().unwrap();
        assert_eq!(found.status, AgentStatus::Pending);
    }

    #[tokio::test]
    async fn test_stale_listing_excludes_terminal() {
        let ledger = setup_ledger().await;
        let mut old = AgentRecord::new("coder001", "coder");
        old.heartbeat_at = Utc::now() - Duration::minutes(10);
        old.status = AgentStatus::Idle;
        ledger.register(&old).await.unwrap();
        ledger.update_status("coder001", AgentStatus::Idle).await.unwrap();

        let mut dead = AgentRecord::new("coder002", "coder");
        dead.heartbeat_at = Utc::now() - Duration::minutes(10);
        ledger.register(&dead).await.unwrap();
        ledger.mark_dead("coder002").await.unwrap();

        let stale = ledger.list_stale(Utc::now() - Duration::minutes(2)).await.unwrap();
        let ids: Vec<_> = stale.iter().map(|a| a.agent_id.as_str()).collect();
        assert!(ids.contains(&"coder001"));
        assert!(!ids.contains(&"coder002"));
    }

    #[tokio::test]
    async fn test_orphan_listing() {
        let ledger = setup_ledger().await;
        let mut orphan = AgentRecord::new("coder001", "coder");
        orphan.spawned_at = Utc::now() - Duration::minutes(5);
        ledger.register(&orphan).await.unwrap();

        let fresh = AgentRecord::new("coder002", "coder");
        ledger.register(&fresh).await.unwrap();

        let orphans = ledger.list_orphans(Utc::now() - Duration::seconds(60)).await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].agent_id, "coder001");
    }

    #[tokio::test]
    async fn test_max_ordinal() {
        let ledger = setup_ledger().await;
        assert_eq!(ledger.max_ordinal("coder").await.unwrap(), 0);

        for ordinal in [1, 7, 3] {
            let record = AgentRecord::new(format!("coder{ordinal:03}"), "coder");
            ledger.register(&record).await.unwrap();
        }
        assert_eq!(ledger.max_ordinal("coder").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_heartbeat_updates_timestamps() {
        let ledger = setup_ledger().await;
        let record = AgentRecord::new("coder001", "coder");
        ledger.register(&record).await.unwrap();

        let later = Utc::now() + Duration::seconds(30);
        ledger.heartbeat("coder001", later).await.unwrap();

        let found = ledger.get("coder001").await.unwrap().unwrap();
        assert_eq!(found.heartbeat_at.timestamp(), later.timestamp());
    }

    #[tokio::test]
    async fn test_missing_agent_errors() {
        let ledger = setup_ledger().await;
        let err = ledger.update_status("ghost001", AgentStatus::Idle).await.unwrap_err();
        assert!(matches!(err, DomainError::AgentNotFound(_)));
    }
}
