//! Memory tools: knowledge, episodes, context, session log.

use chrono::Utc;
use serde_json::{json, Value};

use crate::domain::models::{ContextItem, Episode, KnowledgeItem};
use crate::domain::ports::EpisodeQuery;
use crate::tools::types::{
    GetContextRequest, LogSessionRequest, RecentEpisodesRequest, RecordEpisodeRequest,
    SaveContextRequest, SearchEpisodesRequest, SearchKnowledgeRequest, StoreKnowledgeRequest,
};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "store_knowledge",
        "Store a searchable, tagged knowledge entry",
        json!({
            "type": "object",
            "properties": {
                "category": { "type": "string" },
                "title": { "type": "string" },
                "content": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["title", "content"]
        }),
        store_knowledge,
    );

    registry.register(
        "search_knowledge",
        "Substring search over stored knowledge",
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "default": 50 }
            },
            "required": ["query"]
        }),
        search_knowledge,
    );

    registry.register(
        "record_episode",
        "Append a time-ordered session episode",
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string" },
                "event_type": { "type": "string" },
                "content": { "type": "string" },
                "importance": { "type": "integer", "minimum": 1, "maximum": 10, "default": 5 }
            },
            "required": ["session_id", "content"]
        }),
        record_episode,
    );

    registry.register(
        "get_recent_episodes",
        "Recent episodes, optionally narrowed to a session",
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string" },
                "limit": { "type": "integer", "default": 50 }
            }
        }),
        get_recent_episodes,
    );

    registry.register(
        "search_episodes",
        "Text search over episodes",
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "session_id": { "type": "string" },
                "limit": { "type": "integer", "default": 50 }
            },
            "required": ["query"]
        }),
        search_episodes,
    );

    registry.register(
        "save_context",
        "Persist a keyed context item across restarts",
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "type": "string" },
                "priority": { "type": "integer", "minimum": 1, "maximum": 10, "default": 5 },
                "max_age_hours": { "type": "integer", "default": 0, "description": "0 = never expires" }
            },
            "required": ["key", "value"]
        }),
        save_context,
    );

    registry.register(
        "get_context",
        "Fetch one context item by key",
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" }
            },
            "required": ["key"]
        }),
        get_context,
    );

    registry.register(
        "get_all_context",
        "All unexpired context items, highest priority first",
        json!({ "type": "object", "properties": {} }),
        get_all_context,
    );

    registry.register(
        "log_session",
        "Append a session summary to the durable session log",
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" }
            },
            "required": ["summary"]
        }),
        log_session,
    );
}

async fn store_knowledge(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: StoreKnowledgeRequest = parse_args(arguments)?;
    let item = KnowledgeItem::new(&ctx.caller_agent_id, &params.title, &params.content)
        .with_category(&params.category)
        .with_tags(params.tags);
    let id = item.id.clone();
    ctx.deps.memory.store_knowledge(&item).await?;
    Ok(json!({ "knowledge_id": id }))
}

async fn search_knowledge(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SearchKnowledgeRequest = parse_args(arguments)?;
    let items = ctx.deps.memory.search_knowledge(&params.query, params.limit).await?;
    Ok(json!({ "count": items.len(), "results": items }))
}

async fn record_episode(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: RecordEpisodeRequest = parse_args(arguments)?;
    let mut episode = Episode::new(&params.session_id, &ctx.caller_agent_id, &params.content)
        .with_importance(params.importance);
    episode.event_type = params.event_type;
    let id = episode.id.clone();
    ctx.deps.memory.record_episode(&episode).await?;
    Ok(json!({ "episode_id": id }))
}

async fn get_recent_episodes(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: RecentEpisodesRequest = parse_args(arguments)?;
    let episodes = ctx
        .deps
        .memory
        .recent_episodes(EpisodeQuery {
            session_id: params.session_id,
            limit: Some(params.limit),
            ..Default::default()
        })
        .await?;
    Ok(json!({ "count": episodes.len(), "episodes": episodes }))
}

async fn search_episodes(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SearchEpisodesRequest = parse_args(arguments)?;
    let episodes = ctx
        .deps
        .memory
        .recent_episodes(EpisodeQuery {
            session_id: params.session_id,
            text: Some(params.query),
            limit: Some(params.limit),
            ..Default::default()
        })
        .await?;
    Ok(json!({ "count": episodes.len(), "episodes": episodes }))
}

async fn save_context(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SaveContextRequest = parse_args(arguments)?;
    let mut item = ContextItem::new(&params.key, &params.value);
    item.priority = params.priority.clamp(1, 10);
    item.max_age_hours = params.max_age_hours;
    ctx.deps.memory.save_context(&item).await?;
    Ok(json!({ "key": item.key, "saved": true }))
}

async fn get_context(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: GetContextRequest = parse_args(arguments)?;
    let item = ctx.deps.memory.get_context(&params.key).await?;
    Ok(json!({ "item": item }))
}

async fn get_all_context(ctx: ToolContext, _arguments: Value) -> Result<Value, ToolError> {
    let items = ctx.deps.memory.all_context(Utc::now()).await?;
    Ok(json!({ "count": items.len(), "items": items }))
}

async fn log_session(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: LogSessionRequest = parse_args(arguments)?;
    ctx.deps.memory.log_session(&ctx.caller_agent_id, &params.summary).await?;
    Ok(json!({ "logged": true }))
}
