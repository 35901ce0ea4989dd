//! SQLite implementation of the MemoryRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ContextItem, Document, Episode, KnowledgeItem};
use crate::domain::ports::{EpisodeQuery, MemoryRepository};

#[derive(Clone)]
pub struct SqliteMemoryRepository {
    pool: SqlitePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryRepository for SqliteMemoryRepository {
    async fn store_knowledge(&self, item: &KnowledgeItem) -> DomainResult<()> {
        let tags_json = serde_json::to_string(&item.tags)?;
        sqlx::query(
            r#"INSERT INTO knowledge (id, agent_id, category, title, content, tags, use_count, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&item.id)
        .bind(&item.agent_id)
        .bind(&item.category)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&tags_json)
        .bind(i64::from(item.use_count))
        .bind(item.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn search_knowledge(&self, query: &str, limit: u32) -> DomainResult<Vec<KnowledgeItem>> {
        let pattern = format!("%{query}%");
        let rows: Vec<KnowledgeRow> = sqlx::query_as(
            r#"SELECT * FROM knowledge
               WHERE title LIKE ? OR content LIKE ? OR tags LIKE ? OR category LIKE ?
               ORDER BY use_count DESC, created_at DESC LIMIT ?"#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        // Retrieval counts as use.
        for row in &rows {
            sqlx::query("UPDATE knowledge SET use_count = use_count + 1 WHERE id = ?")
                .bind(&row.id)
                .execute(&self.pool)
                .await?;
        }

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_episode(&self, episode: &Episode) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO episodes (id, session_id, agent_id, event_type, content, importance, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&episode.id)
        .bind(&episode.session_id)
        .bind(&episode.agent_id)
        .bind(&episode.event_type)
        .bind(&episode.content)
        .bind(i64::from(episode.importance))
        .bind(episode.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_episodes(&self, query: EpisodeQuery) -> DomainResult<Vec<Episode>> {
        let mut sql = String::from("SELECT * FROM episodes WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(session_id) = &query.session_id {
            sql.push_str(" AND session_id = ?");
            bindings.push(session_id.clone());
        }
        if let Some(agent_id) = &query.agent_id {
            sql.push_str(" AND agent_id = ?");
            bindings.push(agent_id.clone());
        }
        if let Some(text) = &query.text {
            sql.push_str(" AND content LIKE ?");
            bindings.push(format!("%{text}%"));
        }
        if let Some(min) = query.min_importance {
            sql.push_str(" AND importance >= ?");
            bindings.push(min.to_string());
        }
        sql.push_str(" ORDER BY created_at DESC");
        sql.push_str(&format!(" LIMIT {}", query.limit.unwrap_or(50)));

        let mut q = sqlx::query_as::<_, EpisodeRow>(&sql);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<EpisodeRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_context(&self, item: &ContextItem) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO context_items (key, value, priority, max_age_hours, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 priority = excluded.priority,
                 max_age_hours = excluded.max_age_hours,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&item.key)
        .bind(&item.value)
        .bind(i64::from(item.priority))
        .bind(i64::from(item.max_age_hours))
        .bind(item.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_context(&self, key: &str) -> DomainResult<Option<ContextItem>> {
        let row: Option<ContextRow> = sqlx::query_as("SELECT * FROM context_items WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn all_context(&self, now: DateTime<Utc>) -> DomainResult<Vec<ContextItem>> {
        let rows: Vec<ContextRow> =
            sqlx::query_as("SELECT * FROM context_items ORDER BY priority DESC, updated_at DESC")
                .fetch_all(&self.pool)
                .await?;

        let items: Vec<ContextItem> = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(items.into_iter().filter(|i| !i.is_expired(now)).collect())
    }

    async fn purge_expired_context(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let all = self
            .all_context(now)
            .await?
            .into_iter()
            .map(|i| i.key)
            .collect::<Vec<_>>();

        // Items that survived the age filter stay; everything else goes.
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM context_items")
            .fetch_all(&self.pool)
            .await?;

        let mut purged = 0u64;
        for (key,) in rows {
            if !all.contains(&key) {
                sqlx::query("DELETE FROM context_items WHERE key = ?")
                    .bind(&key)
                    .execute(&self.pool)
                    .await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn save_document(&self, document: &Document) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO documents (id, agent_id, doc_type, title, content, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&document.id)
        .bind(&document.agent_id)
        .bind(&document.doc_type)
        .bind(&document.title)
        .bind(&document.content)
        .bind(document.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_document(&self, id: &str) -> DomainResult<Option<Document>> {
        let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn search_documents(&self, query: &str, limit: u32) -> DomainResult<Vec<Document>> {
        let pattern = format!("%{query}%");
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT * FROM documents WHERE title LIKE ? OR content LIKE ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_documents_for_agent(&self, agent_id: &str) -> DomainResult<Vec<Document>> {
        let rows: Vec<DocumentRow> =
            sqlx::query_as("SELECT * FROM documents WHERE agent_id = ? ORDER BY created_at DESC")
                .bind(agent_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn log_session(&self, agent_id: &str, summary: &str) -> DomainResult<()> {
        sqlx::query("INSERT INTO session_log (id, agent_id, summary, created_at) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(agent_id)
            .bind(summary)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_tool_call(&self, agent_id: &str, tokens: u64) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO agent_metrics (agent_id, tool_calls, tokens_estimated, updated_at)
               VALUES (?, 1, ?, ?)
               ON CONFLICT(agent_id) DO UPDATE SET
                 tool_calls = tool_calls + 1,
                 tokens_estimated = tokens_estimated + excluded.tokens_estimated,
                 updated_at = excluded.updated_at"#,
        )
        .bind(agent_id)
        .bind(i64::try_from(tokens).unwrap_or(i64::MAX))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn tokens_estimated(&self, agent_id: &str) -> DomainResult<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT tokens_estimated FROM agent_metrics WHERE agent_id = ?")
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(t,)| u64::try_from(t.max(0)).unwrap_or(0)).unwrap_or(0))
    }

    async fn seed_named_config(&self, name: &str, content: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO named_configs (name, content, updated_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn seed_prompt(&self, name: &str, content: &str) -> DomainResult<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO prompts (name, content, updated_at) VALUES (?, ?, ?)")
                .bind(name)
                .bind(content)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_prompt(&self, name: &str) -> DomainResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT content FROM prompts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(c,)| c))
    }
}

#[derive(sqlx::FromRow)]
struct KnowledgeRow {
    id: String,
    agent_id: String,
    category: String,
    title: String,
    content: String,
    tags: Option<String>,
    use_count: i64,
    created_at: String,
}

impl TryFrom<KnowledgeRow> for KnowledgeItem {
    type Error = DomainError;

    fn try_from(row: KnowledgeRow) -> Result<Self, Self::Error> {
        let tags: Vec<String> = super::parse_json_or_default(row.tags)?;
        Ok(KnowledgeItem {
            id: row.id,
            agent_id: row.agent_id,
            category: row.category,
            title: row.title,
            content: row.content,
            tags,
            use_count: u32::try_from(row.use_count.max(0)).unwrap_or(0),
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EpisodeRow {
    id: String,
    session_id: String,
    agent_id: String,
    event_type: String,
    content: String,
    importance: i64,
    created_at: String,
}

impl TryFrom<EpisodeRow> for Episode {
    type Error = DomainError;

    fn try_from(row: EpisodeRow) -> Result<Self, Self::Error> {
        Ok(Episode {
            id: row.id,
            session_id: row.session_id,
            agent_id: row.agent_id,
            event_type: row.event_type,
            content: row.content,
            importance: u32::try_from(row.importance.clamp(1, 10)).unwrap_or(5),
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContextRow {
    key: String,
    value: String,
    priority: i64,
    max_age_hours: i64,
    updated_at: String,
}

impl TryFrom<ContextRow> for ContextItem {
    type Error = DomainError;

    fn try_from(row: ContextRow) -> Result<Self, Self::Error> {
        Ok(ContextItem {
            key: row.key,
            value: row.value,
            priority: u32::try_from(row.priority.clamp(1, 10)).unwrap_or(5),
            max_age_hours: u32::try_from(row.max_age_hours.max(0)).unwrap_or(0),
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    agent_id: String,
    doc_type: String,
    title: String,
    content: String,
    created_at: String,
}

impl TryFrom<DocumentRow> for Document {
    type Error = DomainError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Document {
            id: row.id,
            agent_id: row.agent_id,
            doc_type: row.doc_type,
            title: row.title,
            content: row.content,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}
