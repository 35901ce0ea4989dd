//! Durable memory repository port: knowledge, episodes, context, documents,
//! session log, metrics, and seed rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ContextItem, Document, Episode, KnowledgeItem};

/// Filter for episode queries.
#[derive(Debug, Clone, Default)]
pub struct EpisodeQuery {
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub text: Option<String>,
    pub min_importance: Option<u32>,
    pub limit: Option<u32>,
}

#[async_trait]
pub trait MemoryRepository: Send + Sync {
    // Knowledge

    async fn store_knowledge(&self, item: &KnowledgeItem) -> DomainResult<()>;

    /// Substring search over title, content, and tags; bumps `use_count`
    /// on returned rows.
    async fn search_knowledge(&self, query: &str, limit: u32) -> DomainResult<Vec<KnowledgeItem>>;

    // Episodes

    async fn record_episode(&self, episode: &Episode) -> DomainResult<()>;

    async fn recent_episodes(&self, query: EpisodeQuery) -> DomainResult<Vec<Episode>>;

    // Context

    async fn save_context(&self, item: &ContextItem) -> DomainResult<()>;

    async fn get_context(&self, key: &str) -> DomainResult<Option<ContextItem>>;

    /// All unexpired items, highest priority first.
    async fn all_context(&self, now: DateTime<Utc>) -> DomainResult<Vec<ContextItem>>;

    async fn purge_expired_context(&self, now: DateTime<Utc>) -> DomainResult<u64>;

    // Documents

    async fn save_document(&self, document: &Document) -> DomainResult<()>;

    async fn get_document(&self, id: &str) -> DomainResult<Option<Document>>;

    async fn search_documents(&self, query: &str, limit: u32) -> DomainResult<Vec<Document>>;

    async fn list_documents_for_agent(&self, agent_id: &str) -> DomainResult<Vec<Document>>;

    // Session log & metrics

    async fn log_session(&self, agent_id: &str, summary: &str) -> DomainResult<()>;

    /// Accumulate one tool call and its token estimate for an agent.
    async fn record_tool_call(&self, agent_id: &str, tokens: u64) -> DomainResult<()>;

    async fn tokens_estimated(&self, agent_id: &str) -> DomainResult<u64>;

    // Seeding

    /// Insert the named config row from file content if missing.
    async fn seed_named_config(&self, name: &str, content: &str) -> DomainResult<bool>;

    /// Insert the prompt row from file content if missing.
    async fn seed_prompt(&self, name: &str, content: &str) -> DomainResult<bool>;

    async fn get_prompt(&self, name: &str) -> DomainResult<Option<String>>;
}
