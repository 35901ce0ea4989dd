//! Sergeant workflow tools: dispatch, accept, submit, review, complete.

use serde_json::{json, Value};

use crate::domain::errors::DomainError;
use crate::domain::models::{
    Activity, Assignment, AssignmentStatus, Event, EventPriority, EventType, Task, TaskStatus,
};
use crate::services::captain::AgentSignal;
use crate::tools::types::{
    AcceptAssignmentRequest, CompleteWorkerRequest, DispatchTaskRequest, LogWorkerRequest,
    SubmitForReviewRequest, SubmitReviewResultRequest,
};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "dispatch_task",
        "Create a task and assign it to a worker agent",
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "assigned_to": { "type": "string", "description": "Worker agent id" },
                "branch_name": { "type": "string" }
            },
            "required": ["description", "assigned_to"]
        }),
        dispatch_task,
    );

    registry.register(
        "accept_assignment",
        "Accept an assignment and move it to in_progress",
        json!({
            "type": "object",
            "properties": {
                "assignment_id": { "type": "string" }
            },
            "required": ["assignment_id"]
        }),
        accept_assignment,
    );

    registry.register(
        "get_my_assignment",
        "Fetch the caller's current open assignment, if any",
        json!({ "type": "object", "properties": {} }),
        get_my_assignment,
    );

    registry.register(
        "submit_for_review",
        "Mark an assignment ready for review",
        json!({
            "type": "object",
            "properties": {
                "assignment_id": { "type": "string" },
                "summary": { "type": "string" }
            },
            "required": ["assignment_id"]
        }),
        submit_for_review,
    );

    registry.register(
        "submit_review_result",
        "Single-reviewer verdict on an assignment: approve, or send to rework/escalation",
        json!({
            "type": "object",
            "properties": {
                "assignment_id": { "type": "string" },
                "approved": { "type": "boolean" },
                "feedback": { "type": "string" }
            },
            "required": ["assignment_id", "approved"]
        }),
        submit_review_result,
    );

    registry.register(
        "complete_worker",
        "Report the caller's assignment finished and record learnings",
        json!({
            "type": "object",
            "properties": {
                "assignment_id": { "type": "string" },
                "summary": { "type": "string" }
            },
            "required": ["assignment_id"]
        }),
        complete_worker,
    );

    registry.register(
        "log_worker",
        "Append a worker progress note to the activity feed",
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" }
            },
            "required": ["message"]
        }),
        log_worker,
    );
}

async fn dispatch_task(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: DispatchTaskRequest = parse_args(arguments)?;

    let task = Task::new(&params.description);
    ctx.deps.tasks.create(&task).await?;
    ctx.deps.tasks.assign(&task.task_id, &params.assigned_to).await?;

    let assignment = Assignment::new(&task.task_id, &params.assigned_to, &ctx.caller_agent_id)
        .with_branch(&params.branch_name);
    ctx.deps.assignments.create(&assignment).await?;

    ctx.deps
        .bus
        .publish(
            Event::new(EventType::TaskAssignment, &ctx.caller_agent_id, &params.assigned_to)
                .with_priority(EventPriority::High)
                .with_payload(json!({
                    "task_id": &task.task_id,
                    "assignment_id": &assignment.id,
                    "description": &params.description,
                    "branch_name": &params.branch_name,
                })),
        )
        .await;

    Ok(json!({ "task_id": task.task_id, "assignment_id": assignment.id }))
}

async fn accept_assignment(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: AcceptAssignmentRequest = parse_args(arguments)?;
    let assignment = fetch_owned_assignment(&ctx, &params.assignment_id).await?;

    if !matches!(assignment.status, AssignmentStatus::Pending | AssignmentStatus::Rework) {
        return Err(DomainError::Conflict(format!(
            "assignment {} is {}",
            assignment.id,
            assignment.status.as_str()
        ))
        .into());
    }

    ctx.deps.assignments.update_status(&assignment.id, AssignmentStatus::InProgress).await?;
    if let Some(task) = ctx.deps.tasks.get(&assignment.task_id).await? {
        if task.status == TaskStatus::Assigned {
            ctx.deps.tasks.update_status(&task.task_id, TaskStatus::InProgress).await?;
        }
    }

    ctx.deps
        .captain
        .handle_signal(&ctx.caller_agent_id, AgentSignal::Working, "accepted assignment", false)
        .await;

    Ok(json!({
        "assignment_id": assignment.id,
        "task_id": assignment.task_id,
        "review_attempt": assignment.review_attempt,
        "feedback": assignment.feedback,
    }))
}

async fn get_my_assignment(ctx: ToolContext, _arguments: Value) -> Result<Value, ToolError> {
    let mine = ctx.deps.assignments.list_for_agent(&ctx.caller_agent_id, None).await?;

    // Rework first: it carries feedback the coder must address.
    let open = mine
        .iter()
        .find(|a| a.status == AssignmentStatus::Rework)
        .or_else(|| {
            mine.iter().find(|a| {
                matches!(a.status, AssignmentStatus::Pending | AssignmentStatus::InProgress)
            })
        });

    match open {
        Some(assignment) => Ok(json!({ "assignment": assignment })),
        None => Ok(json!({ "assignment": null })),
    }
}

async fn submit_for_review(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SubmitForReviewRequest = parse_args(arguments)?;
    let assignment = fetch_owned_assignment(&ctx, &params.assignment_id).await?;

    ctx.deps.assignments.update_status(&assignment.id, AssignmentStatus::Completed).await?;

    ctx.deps
        .bus
        .publish(
            Event::new(EventType::Message, &ctx.caller_agent_id, &assignment.assigned_by)
                .with_priority(EventPriority::High)
                .with_payload(json!({
                    "kind": "ready_for_review",
                    "assignment_id": &assignment.id,
                    "task_id": &assignment.task_id,
                    "review_attempt": assignment.review_attempt,
                    "summary": &params.summary,
                })),
        )
        .await;

    Ok(json!({ "assignment_id": assignment.id, "status": "ready_for_review" }))
}

async fn submit_review_result(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SubmitReviewResultRequest = parse_args(arguments)?;
    let assignment = ctx
        .deps
        .assignments
        .get(&params.assignment_id)
        .await?
        .ok_or_else(|| DomainError::AssignmentNotFound(params.assignment_id.clone()))?;

    if assignment.status.is_terminal() {
        return Err(DomainError::Conflict(format!(
            "assignment {} is already {}",
            assignment.id,
            assignment.status.as_str()
        ))
        .into());
    }

    let (status, attempt) = if params.approved {
        ctx.deps
            .assignments
            .complete(&assignment.id, AssignmentStatus::Approved, &params.feedback)
            .await?;
        if let Some(task) = ctx.deps.tasks.get(&assignment.task_id).await? {
            if task.status.can_transition_to(TaskStatus::Completed) {
                ctx.deps.tasks.update_status(&task.task_id, TaskStatus::Completed).await?;
            }
        }
        (AssignmentStatus::Approved, assignment.review_attempt)
    } else if assignment.can_rework(ctx.deps.max_review_cycles) {
        let reworked = ctx.deps.assignments.request_rework(&assignment.id, &params.feedback).await?;
        (AssignmentStatus::Rework, reworked.review_attempt)
    } else {
        ctx.deps
            .assignments
            .complete(&assignment.id, AssignmentStatus::Escalated, &params.feedback)
            .await?;
        (AssignmentStatus::Escalated, assignment.review_attempt)
    };

    ctx.deps
        .bus
        .publish(
            Event::new(EventType::Message, &ctx.caller_agent_id, &assignment.assigned_to)
                .with_priority(EventPriority::High)
                .with_payload(json!({
                    "kind": "review_result",
                    "assignment_id": &assignment.id,
                    "approved": params.approved,
                    "status": status.as_str(),
                    "feedback": &params.feedback,
                })),
        )
        .await;

    Ok(json!({
        "assignment_id": assignment.id,
        "status": status.as_str(),
        "review_attempt": attempt,
    }))
}

async fn complete_worker(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: CompleteWorkerRequest = parse_args(arguments)?;
    let assignment = fetch_owned_assignment(&ctx, &params.assignment_id).await?;

    ctx.deps
        .assignments
        .complete(&assignment.id, AssignmentStatus::Completed, &params.summary)
        .await?;
    if !params.summary.is_empty() {
        ctx.deps.tasks.append_learnings(&assignment.task_id, &params.summary).await?;
    }

    ctx.deps
        .captain
        .handle_signal(&ctx.caller_agent_id, AgentSignal::Completed, &params.summary, true)
        .await;

    Ok(json!({ "assignment_id": assignment.id, "status": "completed" }))
}

async fn log_worker(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: LogWorkerRequest = parse_args(arguments)?;
    let activity = Activity::new(&ctx.caller_agent_id, "worker_log", &params.message);
    let id = activity.id.clone();
    ctx.deps.store.update(|state| {
        state.activities.insert(activity.id.clone(), activity);
    });
    Ok(json!({ "activity_id": id }))
}

/// Fetch an assignment and verify the caller owns it.
async fn fetch_owned_assignment(
    ctx: &ToolContext,
    assignment_id: &str,
) -> Result<Assignment, ToolError> {
    let assignment = ctx
        .deps
        .assignments
        .get(assignment_id)
        .await?
        .ok_or_else(|| DomainError::AssignmentNotFound(assignment_id.to_string()))?;

    if assignment.assigned_to != ctx.caller_agent_id {
        return Err(DomainError::Conflict(format!(
            "assignment {} belongs to {}",
            assignment.id, assignment.assigned_to
        ))
        .into());
    }
    Ok(assignment)
}
