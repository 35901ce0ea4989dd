//! Review board domain models: boards, reviewer votes, defects, and the
//! consensus verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk classification assigned when a board is convened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Board lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    Pending,
    InProgress,
    Completed,
}

impl BoardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Final consensus decision of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    Rejected,
    Escalated,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Escalated => "escalated",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "escalated" => Some(Self::Escalated),
            _ => None,
        }
    }
}

/// Defect severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DefectSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Defect resolution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    Open,
    Accepted,
    Rejected,
    Resolved,
}

impl DefectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// An N-reviewer panel convened for one review attempt of an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewBoard {
    pub board_id: String,
    pub assignment_id: String,
    /// Clamped into 1..=5 at creation
    pub reviewer_count: u32,
    pub complexity_score: u32,
    pub risk_level: RiskLevel,
    pub status: BoardStatus,
    /// Set exactly once, iff status is completed
    pub final_verdict: Option<Verdict>,
    pub aggregated_feedback: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Bounds applied to `reviewer_count` at board creation.
pub const MIN_REVIEWERS: u32 = 1;
pub const MAX_REVIEWERS: u32 = 5;

impl ReviewBoard {
    pub fn new(assignment_id: impl Into<String>, reviewer_count: i64, risk_level: RiskLevel) -> Self {
        Self {
            board_id: Uuid::new_v4().to_string(),
            assignment_id: assignment_id.into(),
            reviewer_count: clamp_reviewer_count(reviewer_count),
            complexity_score: 0,
            risk_level,
            status: BoardStatus::Pending,
            final_verdict: None,
            aggregated_feedback: String::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_complexity(mut self, score: u32) -> Self {
        self.complexity_score = score;
        self
    }
}

/// Coerce a requested reviewer count into the supported panel size.
pub fn clamp_reviewer_count(requested: i64) -> u32 {
    if requested < i64::from(MIN_REVIEWERS) {
        MIN_REVIEWERS
    } else if requested > i64::from(MAX_REVIEWERS) {
        MAX_REVIEWERS
    } else {
        // Bounds checked above.
        u32::try_from(requested).unwrap_or(MIN_REVIEWERS)
    }
}

/// One reviewer's recorded vote on a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerVote {
    pub vote_id: String,
    pub board_id: String,
    pub reviewer_id: String,
    pub approved: bool,
    /// 0..=100
    pub confidence_score: u32,
    pub defects_found: u32,
    pub tokens_used: u64,
    /// Free-form notes concatenated into the aggregated feedback
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl ReviewerVote {
    pub fn new(board_id: impl Into<String>, reviewer_id: impl Into<String>, approved: bool) -> Self {
        Self {
            vote_id: Uuid::new_v4().to_string(),
            board_id: board_id.into(),
            reviewer_id: reviewer_id.into(),
            approved,
            confidence_score: 0,
            defects_found: 0,
            tokens_used: 0,
            notes: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// A defect filed by a reviewer against a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    pub defect_id: String,
    pub board_id: String,
    pub reviewer_id: String,
    pub category: String,
    pub severity: DefectSeverity,
    pub title: String,
    pub description: String,
    pub file_path: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub suggested_fix: Option<String>,
    pub status: DefectStatus,
    pub created_at: DateTime<Utc>,
}

impl Defect {
    pub fn new(
        board_id: impl Into<String>,
        reviewer_id: impl Into<String>,
        severity: DefectSeverity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            defect_id: Uuid::new_v4().to_string(),
            board_id: board_id.into(),
            reviewer_id: reviewer_id.into(),
            category: String::new(),
            severity,
            title: title.into(),
            description: String::new(),
            file_path: None,
            line_start: None,
            line_end: None,
            suggested_fix: None,
            status: DefectStatus::Open,
            created_at: Utc::now(),
        }
    }
}

/// Accumulated quality statistics for one reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerStats {
    pub reviewer_id: String,
    pub participations: u32,
    pub consensus_matches: u32,
    pub defects_submitted: u32,
    pub quality_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl ReviewerStats {
    pub fn new(reviewer_id: impl Into<String>) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            participations: 0,
            consensus_matches: 0,
            defects_submitted: 0,
            quality_score: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Accuracy as the share of votes matching the eventual consensus.
    pub fn accuracy(&self) -> f64 {
        if self.participations == 0 {
            return 0.0;
        }
        f64::from(self.consensus_matches) / f64::from(self.participations)
    }
}
