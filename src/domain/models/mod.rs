//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod agent;
pub mod approval;
pub mod assignment;
pub mod config;
pub mod dashboard;
pub mod event;
pub mod memory;
pub mod review;
pub mod task;

pub use agent::{AgentConfig, AgentRecord, AgentStatus};
pub use approval::{EscalationRequest, StopApprovalRequest};
pub use assignment::{Assignment, AssignmentStatus, MAX_REVIEW_CYCLES};
pub use config::{
    Config, DatabaseConfig, LoggingConfig, OnConflict, PresenceConfig, ProjectEntry,
    ProjectsFile, Teams, TeamsFile,
};
pub use dashboard::{
    Activity, Alert, AlertSeverity, AlertThresholds, CaptainMessage, DashboardState,
    CAPTAIN_MESSAGE_RING,
};
pub use event::{Event, EventPriority, EventType, TARGET_ALL, TARGET_CAPTAIN};
pub use memory::{ContextItem, Document, Episode, KnowledgeItem};
pub use review::{
    clamp_reviewer_count, BoardStatus, Defect, DefectSeverity, DefectStatus, ReviewBoard,
    ReviewerStats, ReviewerVote, RiskLevel, Verdict, MAX_REVIEWERS, MIN_REVIEWERS,
};
pub use task::{Task, TaskFilter, TaskStatus};
