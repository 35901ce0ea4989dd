//! Durable agent ledger port.
//!
//! The ledger is the persistent twin of the state store's live agent map.
//! Two-phase registration: rows are created in `pending` before the
//! subprocess launches, so orphaned spawns always have a row to reap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentRecord, AgentStatus};

#[async_trait]
pub trait AgentLedger: Send + Sync {
    /// Insert a new record, or revive a terminal row with the same id.
    async fn register(&self, record: &AgentRecord) -> DomainResult<()>;

    async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentRecord>>;

    async fn list_all(&self) -> DomainResult<Vec<AgentRecord>>;

    async fn list_by_status(&self, status: AgentStatus) -> DomainResult<Vec<AgentRecord>>;

    async fn update_status(&self, agent_id: &str, status: AgentStatus) -> DomainResult<()>;

    /// Refresh both liveness timestamps.
    async fn heartbeat(&self, agent_id: &str, at: DateTime<Utc>) -> DomainResult<()>;

    async fn set_pid(&self, agent_id: &str, pid: Option<u32>) -> DomainResult<()>;

    async fn set_current_task(&self, agent_id: &str, task: &str) -> DomainResult<()>;

    async fn set_shutdown_requested(&self, agent_id: &str, requested: bool) -> DomainResult<()>;

    /// Agents whose heartbeat is older than `cutoff`, regardless of status.
    /// The presence monitor applies the protected-status filter itself.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<AgentRecord>>;

    /// Pending agents spawned before `cutoff` that never made a tool call.
    async fn list_orphans(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<AgentRecord>>;

    async fn mark_stopped(&self, agent_id: &str) -> DomainResult<()>;

    async fn mark_dead(&self, agent_id: &str) -> DomainResult<()>;

    async fn remove(&self, agent_id: &str) -> DomainResult<()>;

    /// Highest `<NNN>` ordinal ever issued for a config name; used to seed
    /// the spawner's id counter across restarts.
    async fn max_ordinal(&self, config_name: &str) -> DomainResult<u32>;
}
