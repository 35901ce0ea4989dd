//! Recon and progress tools.

use serde_json::{json, Value};

use crate::domain::models::{Activity, Document, Event, EventPriority, EventType, TARGET_CAPTAIN};
use crate::tools::types::{ReportProgressRequest, RequestGuidanceRequest, SubmitReconReportRequest};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "submit_recon_report",
        "Store a reconnaissance report and notify the Captain",
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "findings": { "type": "string" }
            },
            "required": ["title", "findings"]
        }),
        submit_recon_report,
    );

    registry.register(
        "report_progress",
        "Report progress on the current task",
        json!({
            "type": "object",
            "properties": {
                "progress": { "type": "string" },
                "details": { "type": "string" }
            },
            "required": ["progress"]
        }),
        report_progress,
    );

    registry.register(
        "request_guidance",
        "Escalate a question for human guidance via the Captain",
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "context": { "type": "string" }
            },
            "required": ["question"]
        }),
        request_guidance,
    );
}

async fn submit_recon_report(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SubmitReconReportRequest = parse_args(arguments)?;

    let document = Document::new(&ctx.caller_agent_id, &params.title, &params.findings)
        .with_doc_type("recon");
    let document_id = document.id.clone();
    ctx.deps.memory.save_document(&document).await?;

    ctx.deps
        .bus
        .publish(
            Event::new(EventType::Message, &ctx.caller_agent_id, TARGET_CAPTAIN)
                .with_priority(EventPriority::Normal)
                .with_payload(json!({
                    "kind": "recon_report",
                    "document_id": &document_id,
                    "title": &params.title,
                })),
        )
        .await;

    Ok(json!({ "document_id": document_id }))
}

async fn report_progress(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: ReportProgressRequest = parse_args(arguments)?;

    let activity = Activity::new(&ctx.caller_agent_id, "progress", format!("{}: {}", params.progress, params.details));
    ctx.deps.store.update(|state| {
        state.activities.insert(activity.id.clone(), activity);
    });
    ctx.deps.lifecycle.set_current_task(&ctx.caller_agent_id, &params.progress).await;

    ctx.deps
        .bus
        .publish(
            Event::new(EventType::Message, &ctx.caller_agent_id, TARGET_CAPTAIN)
                .with_priority(EventPriority::Low)
                .with_payload(json!({
                    "kind": "progress",
                    "progress": &params.progress,
                    "details": &params.details,
                })),
        )
        .await;

    Ok(json!({ "recorded": true }))
}

async fn request_guidance(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: RequestGuidanceRequest = parse_args(arguments)?;
    let escalation = ctx
        .deps
        .approval
        .request_guidance(&ctx.caller_agent_id, &params.question, &params.context)
        .await;

    Ok(json!({
        "escalation_id": escalation.id,
        "status": "pending",
        "hint": "call wait_for_events with types=[\"guidance_response\"]",
    }))
}
