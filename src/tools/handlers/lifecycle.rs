//! Lifecycle tools: registration, signals, stop approval, activity log.

use serde_json::{json, Value};

use crate::domain::models::{Activity, AgentRecord, AgentStatus};
use crate::services::captain::AgentSignal;
use crate::tools::types::{
    LogActivityRequest, RegisterAgentRequest, RequestStopApprovalRequest, SignalCaptainRequest,
};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "register_agent",
        "Register the calling agent with its role; idempotent for known agents",
        json!({
            "type": "object",
            "properties": {
                "role": { "type": "string", "description": "Agent role label" }
            },
            "required": ["role"]
        }),
        register_agent,
    );

    registry.register(
        "signal_captain",
        "Raise a lifecycle signal (working, completed, blocked, idle, error) to the Captain",
        json!({
            "type": "object",
            "properties": {
                "signal": { "type": "string", "enum": ["working", "completed", "blocked", "idle", "error"] },
                "context": { "type": "string" },
                "work_completed": { "type": "boolean", "default": false }
            },
            "required": ["signal"]
        }),
        signal_captain,
    );

    registry.register(
        "request_stop_approval",
        "Request supervisor approval to exit; follow up with wait_for_events",
        json!({
            "type": "object",
            "properties": {
                "reason": { "type": "string" },
                "context": { "type": "string" },
                "work_completed": { "type": "boolean", "default": false }
            },
            "required": ["reason"]
        }),
        request_stop_approval,
    );

    registry.register(
        "log_activity",
        "Append an entry to the dashboard activity feed",
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string" },
                "details": { "type": "string" }
            },
            "required": ["action"]
        }),
        log_activity,
    );
}

async fn register_agent(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: RegisterAgentRequest = parse_args(arguments)?;
    let agent_id = ctx.caller_agent_id.clone();

    let known = ctx.deps.ledger.get(&agent_id).await?;
    if known.is_none() {
        // Self-registered agents (the Captain among them) have no spawner
        // record; create one and walk it to connected.
        let record = AgentRecord::new(&agent_id, &agent_id).with_role(&params.role);
        ctx.deps.lifecycle.register(record).await?;
        ctx.deps.lifecycle.mark_connected(&agent_id).await;
    }

    ctx.deps.store.update(|state| {
        if let Some(agent) = state.agents.get_mut(&agent_id) {
            agent.role = params.role.clone();
        }
    });

    let status = ctx
        .deps
        .store
        .read(|state| state.agents.get(&agent_id).map(|a| a.status))
        .unwrap_or(AgentStatus::Connected);

    Ok(json!({
        "agent_id": agent_id,
        "role": params.role,
        "status": status.as_str(),
    }))
}

async fn signal_captain(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SignalCaptainRequest = parse_args(arguments)?;
    let signal = AgentSignal::parse_str(&params.signal)
        .ok_or_else(|| ToolError::invalid_params(format!("Unknown signal: {}", params.signal)))?;

    ctx.deps
        .captain
        .handle_signal(&ctx.caller_agent_id, signal, &params.context, params.work_completed)
        .await;

    Ok(json!({ "acknowledged": true, "signal": signal.as_str() }))
}

async fn request_stop_approval(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: RequestStopApprovalRequest = parse_args(arguments)?;
    let request = ctx
        .deps
        .approval
        .request_stop(&ctx.caller_agent_id, &params.reason, &params.context, params.work_completed)
        .await;

    Ok(json!({
        "request_id": request.id,
        "status": "pending",
        "hint": "call wait_for_events with types=[\"stop_approval\"]",
    }))
}

async fn log_activity(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: LogActivityRequest = parse_args(arguments)?;
    let activity = Activity::new(&ctx.caller_agent_id, &params.action, &params.details);
    let id = activity.id.clone();
    ctx.deps.store.update(|state| {
        state.activities.insert(activity.id.clone(), activity);
    });
    Ok(json!({ "activity_id": id }))
}
