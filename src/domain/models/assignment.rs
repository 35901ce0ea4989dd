//! Assignment domain model: a task handed to a specific worker agent for
//! the sergeant workflow (coder -> review board -> captain arbitration).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on rework rounds before an assignment is forcibly escalated.
pub const MAX_REVIEW_CYCLES: u32 = 3;

/// Status of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Rework,
    Approved,
    Escalated,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Rework => "rework",
            Self::Approved => "approved",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "rework" => Some(Self::Rework),
            "approved" => Some(Self::Approved),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }

    /// Escalation is terminal; approved work is done.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Escalated)
    }
}

/// Links a task to a worker agent across review cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub task_id: String,
    pub assigned_to: String,
    pub assigned_by: String,
    pub branch_name: String,
    pub status: AssignmentStatus,
    /// 1-based; incremented on each rework round
    pub review_attempt: u32,
    /// Reviewer feedback attached on rework
    pub feedback: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(
        task_id: impl Into<String>,
        assigned_to: impl Into<String>,
        assigned_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            assigned_to: assigned_to.into(),
            assigned_by: assigned_by.into(),
            branch_name: String::new(),
            status: AssignmentStatus::Pending,
            review_attempt: 1,
            feedback: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch_name = branch.into();
        self
    }

    /// Whether another rework round is allowed, or escalation is forced.
    pub fn can_rework(&self, max_cycles: u32) -> bool {
        self.review_attempt < max_cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            AssignmentStatus::Pending,
            AssignmentStatus::InProgress,
            AssignmentStatus::Completed,
            AssignmentStatus::Rework,
            AssignmentStatus::Approved,
            AssignmentStatus::Escalated,
        ] {
            assert_eq!(AssignmentStatus::parse_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_rework_cycle_cap() {
        let mut assignment = Assignment::new("t1", "coder001", "sgt001");
        assert!(assignment.can_rework(MAX_REVIEW_CYCLES));
        assignment.review_attempt = MAX_REVIEW_CYCLES;
        assert!(!assignment.can_rework(MAX_REVIEW_CYCLES));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AssignmentStatus::Approved.is_terminal());
        assert!(AssignmentStatus::Escalated.is_terminal());
        assert!(!AssignmentStatus::Rework.is_terminal());
    }
}
