//! Captain channel tools, including the event-wait backbone of the
//! bounded approval protocol.

use std::time::Duration;

use serde_json::{json, Value};

use crate::domain::models::{EventPriority, EventType};
use crate::tools::types::{
    GetCaptainMessagesRequest, MarkMessagesReadRequest, SendCaptainResponseRequest,
    SendToAgentRequest, WaitForEventsRequest,
};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

/// Server-policy ceiling on a single wait.
const WAIT_HARD_CAP: Duration = Duration::from_secs(300);

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "get_captain_messages",
        "Poll the human-to-Captain message ring",
        json!({
            "type": "object",
            "properties": {
                "unread_only": { "type": "boolean", "default": false }
            }
        }),
        get_captain_messages,
    );

    registry.register(
        "mark_messages_read",
        "Mark captain messages as read",
        json!({
            "type": "object",
            "properties": {
                "message_ids": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["message_ids"]
        }),
        mark_messages_read,
    );

    registry.register(
        "send_captain_response",
        "Send the Captain's reply toward the human dashboard",
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        }),
        send_captain_response,
    );

    registry.register(
        "wait_for_events",
        "Block until an event targeted at the caller arrives, or the timeout passes",
        json!({
            "type": "object",
            "properties": {
                "types": { "type": "array", "items": { "type": "string" }, "description": "Optional event-type filter" },
                "timeout_s": { "type": "integer", "description": "Defaults to server policy; capped at 300" }
            }
        }),
        wait_for_events,
    );

    registry.register(
        "send_to_agent",
        "Publish an event to a specific agent, the Captain, or all",
        json!({
            "type": "object",
            "properties": {
                "target": { "type": "string" },
                "type": { "type": "string" },
                "payload": { "type": "object" },
                "priority": { "type": "string", "enum": ["low", "normal", "high", "critical"], "default": "normal" }
            },
            "required": ["target", "type"]
        }),
        send_to_agent,
    );
}

async fn get_captain_messages(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: GetCaptainMessagesRequest = parse_args(arguments)?;
    let messages = ctx.deps.captain.get_messages(params.unread_only);
    Ok(json!({ "count": messages.len(), "messages": messages }))
}

async fn mark_messages_read(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: MarkMessagesReadRequest = parse_args(arguments)?;
    let marked = ctx.deps.captain.mark_messages_read(&params.message_ids);
    Ok(json!({ "marked": marked }))
}

async fn send_captain_response(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SendCaptainResponseRequest = parse_args(arguments)?;
    ctx.deps.captain.send_response(&params.text).await;
    Ok(json!({ "sent": true }))
}

async fn wait_for_events(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: WaitForEventsRequest = parse_args(arguments)?;

    let types = params
        .types
        .map(|names| {
            names
                .iter()
                .map(|name| {
                    EventType::parse_str(name)
                        .ok_or_else(|| ToolError::invalid_params(format!("Unknown event type: {name}")))
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let requested = params
        .timeout_s
        .map_or(ctx.deps.approval_timeout, Duration::from_secs);
    let timeout = requested.min(WAIT_HARD_CAP);

    // The subscription exists only for the duration of this call; dropping
    // it (return or cancellation) unsubscribes.
    let subscription = ctx.deps.bus.subscribe(&ctx.caller_agent_id, types);

    let mut events = Vec::new();
    if let Ok(Some(event)) = tokio::time::timeout(timeout, subscription.recv()).await {
        events.push(event);
        // Drain whatever else is already queued.
        while let Some(event) = subscription.try_recv() {
            events.push(event);
        }
    }

    // A long wait should not read as staleness.
    ctx.deps.lifecycle.heartbeat(&ctx.caller_agent_id).await;

    let timed_out = events.is_empty();
    Ok(json!({
        "events": events,
        "timed_out": timed_out,
        "waited_s": timeout.as_secs().min(requested.as_secs()),
    }))
}

async fn send_to_agent(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SendToAgentRequest = parse_args(arguments)?;
    let event_type = EventType::parse_str(&params.event_type)
        .ok_or_else(|| ToolError::invalid_params(format!("Unknown event type: {}", params.event_type)))?;
    let priority = EventPriority::parse_str(&params.priority)
        .ok_or_else(|| ToolError::invalid_params(format!("Unknown priority: {}", params.priority)))?;

    ctx.deps
        .captain
        .forward(&ctx.caller_agent_id, &params.target, event_type, params.payload, priority)
        .await;

    Ok(json!({ "delivered": true, "target": params.target }))
}
