//! Durable orchestration memory: knowledge, episodes, context, documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Long-lived, searchable, tagged knowledge entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub agent_id: String,
    pub category: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub use_count: u32,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn new(agent_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            category: String::new(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            use_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Time-ordered session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    pub event_type: String,
    pub content: String,
    /// 1..=10
    pub importance: u32,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            event_type: String::new(),
            content: content.into(),
            importance: 5,
            created_at: Utc::now(),
        }
    }

    pub fn with_importance(mut self, importance: u32) -> Self {
        self.importance = importance.clamp(1, 10);
        self
    }
}

/// Keyed orchestration memory persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub key: String,
    pub value: String,
    /// 1..=10
    pub priority: u32,
    /// 0 means never expires
    pub max_age_hours: u32,
    pub updated_at: DateTime<Utc>,
}

impl ContextItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            priority: 5,
            max_age_hours: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the item has aged out, given its retention setting.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.max_age_hours == 0 {
            return false;
        }
        (now - self.updated_at).num_hours() >= i64::from(self.max_age_hours)
    }
}

/// A document stored by an agent (reports, notes, rendered board reports).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub agent_id: String,
    pub doc_type: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(agent_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            doc_type: "note".to_string(),
            title: title.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_context_expiry() {
        let mut item = ContextItem::new("focus", "migrating the scheduler");
        assert!(!item.is_expired(Utc::now() + Duration::days(365)));

        item.max_age_hours = 2;
        assert!(!item.is_expired(item.updated_at + Duration::hours(1)));
        assert!(item.is_expired(item.updated_at + Duration::hours(2)));
    }

    #[test]
    fn test_importance_clamped() {
        let episode = Episode::new("s1", "alpha001", "spawned workers").with_importance(42);
        assert_eq!(episode.importance, 10);
        let episode = Episode::new("s1", "alpha001", "idle tick").with_importance(0);
        assert_eq!(episode.importance, 1);
    }

    #[test]
    fn test_knowledge_builder() {
        let item = KnowledgeItem::new("alpha001", "Flaky test workaround", "retry with -j1")
            .with_category("testing")
            .with_tags(vec!["ci".into(), "flake".into()]);
        assert_eq!(item.category, "testing");
        assert_eq!(item.tags.len(), 2);
        assert_eq!(item.use_count, 0);
    }
}
