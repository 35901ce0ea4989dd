//! Tool protocol wire types.
//!
//! Two shapes cross the transport: `tool_call` -> `tool_result`, and
//! server-initiated `notification` pushes. Request parameter structs are
//! the validation layer: serde rejects malformed input before a handler
//! runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code for an unknown tool name.
pub const CODE_UNKNOWN_TOOL: i32 = -32601;

/// A tool invocation from an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Value,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// The reply to a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn ok(id: Value, content: Value) -> Self {
        Self { id, content: Some(content), error: None }
    }

    pub fn err(id: Value, error: ToolError) -> Self {
        Self { id, content: None, error: Some(error) }
    }
}

/// Structured tool failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(crate::domain::errors::ErrorKind::Validation.code(), message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(CODE_UNKNOWN_TOOL, format!("Unknown tool: {name}"))
    }
}

impl From<crate::domain::errors::DomainError> for ToolError {
    fn from(err: crate::domain::errors::DomainError) -> Self {
        Self::new(err.kind().code(), err.to_string())
    }
}

/// A server-initiated push to a specific agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

// ============================================================================
// Lifecycle request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAgentRequest {
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalCaptainRequest {
    pub signal: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub work_completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStopApprovalRequest {
    pub reason: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub work_completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogActivityRequest {
    pub action: String,
    #[serde(default)]
    pub details: String,
}

// ============================================================================
// Sergeant workflow request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchTaskRequest {
    pub description: String,
    pub assigned_to: String,
    #[serde(default)]
    pub branch_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptAssignmentRequest {
    pub assignment_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitForReviewRequest {
    pub assignment_id: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReviewResultRequest {
    pub assignment_id: String,
    pub approved: bool,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompleteWorkerRequest {
    pub assignment_id: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogWorkerRequest {
    pub message: String,
}

// ============================================================================
// Review board request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReviewBoardRequest {
    pub assignment_id: String,
    #[serde(default = "default_reviewer_count")]
    pub reviewer_count: i64,
    #[serde(default = "default_risk_level")]
    pub risk_level: String,
    #[serde(default)]
    pub complexity_score: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitDefectRequest {
    pub board_id: String,
    #[serde(default)]
    pub category: String,
    pub severity: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_start: Option<u32>,
    #[serde(default)]
    pub line_end: Option<u32>,
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordReviewerVoteRequest {
    pub board_id: String,
    pub approved: bool,
    #[serde(default)]
    pub confidence_score: u32,
    #[serde(default)]
    pub defects_found: u32,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalizeBoardRequest {
    pub board_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardRequest {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

// ============================================================================
// Memory request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StoreKnowledgeRequest {
    #[serde(default)]
    pub category: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchKnowledgeRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordEpisodeRequest {
    pub session_id: String,
    #[serde(default)]
    pub event_type: String,
    pub content: String,
    #[serde(default = "default_importance")]
    pub importance: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentEpisodesRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchEpisodesRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveContextRequest {
    pub key: String,
    pub value: String,
    #[serde(default = "default_importance")]
    pub priority: u32,
    #[serde(default)]
    pub max_age_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetContextRequest {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSessionRequest {
    pub summary: String,
}

// ============================================================================
// Captain channel request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct GetCaptainMessagesRequest {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkMessagesReadRequest {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendCaptainResponseRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitForEventsRequest {
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendToAgentRequest {
    pub target: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "default_priority")]
    pub priority: String,
}

// ============================================================================
// Document request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SaveDocumentRequest {
    pub title: String,
    pub content: String,
    #[serde(default = "default_doc_type")]
    pub doc_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetDocumentRequest {
    pub document_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchDocumentsRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

// ============================================================================
// Recon / progress request types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReconReportRequest {
    pub title: String,
    pub findings: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportProgressRequest {
    pub progress: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestGuidanceRequest {
    pub question: String,
    #[serde(default)]
    pub context: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_limit() -> u32 {
    50
}

fn default_importance() -> u32 {
    5
}

fn default_reviewer_count() -> i64 {
    3
}

fn default_risk_level() -> String {
    "medium".to_string()
}

fn default_priority() -> String {
    "normal".to_string()
}

fn default_doc_type() -> String {
    "note".to_string()
}
