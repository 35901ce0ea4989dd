//! Review board repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    BoardStatus, Defect, DefectStatus, ReviewBoard, ReviewerStats, ReviewerVote, Verdict,
};

/// One row of the reviewer quality leaderboard.
#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub reviewer_id: String,
    pub participations: u32,
    pub accuracy: f64,
    pub defects_submitted: u32,
    pub quality_score: f64,
}

/// Defect counts grouped by category.
#[derive(Debug, Clone)]
pub struct DefectCategoryCount {
    pub category: String,
    pub count: u64,
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn create_board(&self, board: &ReviewBoard) -> DomainResult<()>;

    async fn get_board(&self, board_id: &str) -> DomainResult<Option<ReviewBoard>>;

    async fn list_boards(&self, status: Option<BoardStatus>) -> DomainResult<Vec<ReviewBoard>>;

    async fn update_board_status(&self, board_id: &str, status: BoardStatus) -> DomainResult<()>;

    /// Write the verdict, aggregated feedback, and completion timestamp in
    /// one transaction. Fails with a conflict if already completed.
    async fn finalize_board(
        &self,
        board_id: &str,
        verdict: Verdict,
        aggregated_feedback: &str,
        completed_at: DateTime<Utc>,
    ) -> DomainResult<()>;

    /// At most one vote per (board, reviewer); duplicates are a conflict.
    async fn record_vote(&self, vote: &ReviewerVote) -> DomainResult<()>;

    /// Votes in recording order.
    async fn list_votes(&self, board_id: &str) -> DomainResult<Vec<ReviewerVote>>;

    async fn create_defect(&self, defect: &Defect) -> DomainResult<()>;

    async fn list_defects(&self, board_id: &str) -> DomainResult<Vec<Defect>>;

    async fn update_defect_status(&self, defect_id: &str, status: DefectStatus) -> DomainResult<()>;

    async fn get_reviewer_stats(&self, reviewer_id: &str) -> DomainResult<Option<ReviewerStats>>;

    async fn upsert_reviewer_stats(&self, stats: &ReviewerStats) -> DomainResult<()>;

    async fn leaderboard(&self, limit: u32) -> DomainResult<Vec<LeaderboardEntry>>;

    async fn defect_categories(&self) -> DomainResult<Vec<DefectCategoryCount>>;
}
