//! Durable event journal port.
//!
//! The bus appends every published event here (when configured) so a
//! reconnecting subscriber can replay from a cursor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::Event;

/// An event paired with its journal sequence, the replay cursor.
#[derive(Debug, Clone)]
pub struct ReplayedEvent {
    pub sequence: i64,
    pub event: Event,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &Event) -> DomainResult<i64>;

    /// Events with sequence strictly greater than `cursor`, oldest first,
    /// optionally narrowed to those visible to `target`.
    async fn replay_since(
        &self,
        cursor: i64,
        target: Option<&str>,
        limit: u32,
    ) -> DomainResult<Vec<ReplayedEvent>>;

    async fn latest_sequence(&self) -> DomainResult<i64>;

    async fn count(&self) -> DomainResult<u64>;

    /// Delete events created before `cutoff`; returns rows removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
