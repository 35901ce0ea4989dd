//! Review board tools.

use serde_json::{json, Value};

use crate::domain::models::{Defect, DefectSeverity, ReviewerVote, RiskLevel};
use crate::tools::types::{
    CreateReviewBoardRequest, FinalizeBoardRequest, LeaderboardRequest, RecordReviewerVoteRequest,
    SubmitDefectRequest,
};
use crate::tools::{parse_args, ToolContext, ToolError, ToolRegistry};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "create_review_board",
        "Convene an N-reviewer board for an assignment's current attempt",
        json!({
            "type": "object",
            "properties": {
                "assignment_id": { "type": "string" },
                "reviewer_count": { "type": "integer", "default": 3, "minimum": 1, "maximum": 5 },
                "risk_level": { "type": "string", "enum": ["low", "medium", "high"], "default": "medium" },
                "complexity_score": { "type": "integer", "default": 0 }
            },
            "required": ["assignment_id"]
        }),
        create_review_board,
    );

    registry.register(
        "submit_defect",
        "File a defect against a live review board",
        json!({
            "type": "object",
            "properties": {
                "board_id": { "type": "string" },
                "category": { "type": "string" },
                "severity": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "file_path": { "type": "string" },
                "line_start": { "type": "integer" },
                "line_end": { "type": "integer" },
                "suggested_fix": { "type": "string" }
            },
            "required": ["board_id", "severity", "title"]
        }),
        submit_defect,
    );

    registry.register(
        "record_reviewer_vote",
        "Record the caller's vote on a board; one vote per reviewer",
        json!({
            "type": "object",
            "properties": {
                "board_id": { "type": "string" },
                "approved": { "type": "boolean" },
                "confidence_score": { "type": "integer", "minimum": 0, "maximum": 100 },
                "defects_found": { "type": "integer" },
                "tokens_used": { "type": "integer" },
                "notes": { "type": "string" }
            },
            "required": ["board_id", "approved"]
        }),
        record_reviewer_vote,
    );

    registry.register(
        "finalize_board",
        "Compute the consensus verdict and apply it to the assignment",
        json!({
            "type": "object",
            "properties": {
                "board_id": { "type": "string" }
            },
            "required": ["board_id"]
        }),
        finalize_board,
    );

    registry.register(
        "get_agent_leaderboard",
        "Reviewer quality leaderboard",
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 50 }
            }
        }),
        get_agent_leaderboard,
    );

    registry.register(
        "get_defect_categories",
        "Defect counts grouped by category",
        json!({ "type": "object", "properties": {} }),
        get_defect_categories,
    );
}

async fn create_review_board(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: CreateReviewBoardRequest = parse_args(arguments)?;
    let risk_level = RiskLevel::parse_str(&params.risk_level)
        .ok_or_else(|| ToolError::invalid_params(format!("Unknown risk level: {}", params.risk_level)))?;

    let board = ctx
        .deps
        .review_board
        .create_board(&params.assignment_id, params.reviewer_count, risk_level, params.complexity_score)
        .await?;

    Ok(json!({
        "board_id": board.board_id,
        "reviewer_count": board.reviewer_count,
        "risk_level": board.risk_level.as_str(),
    }))
}

async fn submit_defect(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: SubmitDefectRequest = parse_args(arguments)?;
    let severity = DefectSeverity::parse_str(&params.severity)
        .ok_or_else(|| ToolError::invalid_params(format!("Unknown severity: {}", params.severity)))?;

    let mut defect = Defect::new(&params.board_id, &ctx.caller_agent_id, severity, &params.title);
    defect.category = params.category;
    defect.description = params.description;
    defect.file_path = params.file_path;
    defect.line_start = params.line_start;
    defect.line_end = params.line_end;
    defect.suggested_fix = params.suggested_fix;

    let defect_id = defect.defect_id.clone();
    ctx.deps.review_board.submit_defect(defect).await?;
    Ok(json!({ "defect_id": defect_id }))
}

async fn record_reviewer_vote(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: RecordReviewerVoteRequest = parse_args(arguments)?;

    let mut vote = ReviewerVote::new(&params.board_id, &ctx.caller_agent_id, params.approved);
    vote.confidence_score = params.confidence_score.min(100);
    vote.defects_found = params.defects_found;
    vote.tokens_used = params.tokens_used;
    vote.notes = params.notes;

    let vote_id = vote.vote_id.clone();
    ctx.deps.review_board.record_vote(vote).await?;
    Ok(json!({ "vote_id": vote_id }))
}

async fn finalize_board(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: FinalizeBoardRequest = parse_args(arguments)?;
    let outcome = ctx.deps.review_board.finalize(&params.board_id).await?;

    Ok(json!({
        "board_id": outcome.board_id,
        "verdict": outcome.verdict.as_str(),
        "votes_for": outcome.votes_for,
        "votes_against": outcome.votes_against,
        "critical_defects": outcome.critical_defects,
        "assignment_status": outcome.assignment_status.as_str(),
        "review_attempt": outcome.review_attempt,
        "aggregated_feedback": outcome.aggregated_feedback,
    }))
}

async fn get_agent_leaderboard(ctx: ToolContext, arguments: Value) -> Result<Value, ToolError> {
    let params: LeaderboardRequest = parse_args(arguments)?;
    let entries = ctx.deps.reviews.leaderboard(params.limit).await?;

    let rows: Vec<Value> = entries
        .iter()
        .map(|e| {
            json!({
                "reviewer_id": e.reviewer_id,
                "participations": e.participations,
                "accuracy": e.accuracy,
                "defects_submitted": e.defects_submitted,
                "quality_score": e.quality_score,
            })
        })
        .collect();

    Ok(json!({ "leaderboard": rows }))
}

async fn get_defect_categories(ctx: ToolContext, _arguments: Value) -> Result<Value, ToolError> {
    let categories = ctx.deps.reviews.defect_categories().await?;
    let rows: Vec<Value> = categories
        .iter()
        .map(|c| json!({ "category": c.category, "count": c.count }))
        .collect();
    Ok(json!({ "categories": rows }))
}
