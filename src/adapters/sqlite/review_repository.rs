//! SQLite implementation of the ReviewRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BoardStatus, Defect, DefectSeverity, DefectStatus, ReviewBoard, ReviewerStats, ReviewerVote,
    RiskLevel, Verdict,
};
use crate::domain::ports::{DefectCategoryCount, LeaderboardEntry, ReviewRepository};

#[derive(Clone)]
pub struct SqliteReviewRepository {
    pool: SqlitePool,
}

impl SqliteReviewRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewRepository for SqliteReviewRepository {
    async fn create_board(&self, board: &ReviewBoard) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO review_boards (board_id, assignment_id, reviewer_count, complexity_score,
               risk_level, status, final_verdict, aggregated_feedback, created_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&board.board_id)
        .bind(&board.assignment_id)
        .bind(i64::from(board.reviewer_count))
        .bind(i64::from(board.complexity_score))
        .bind(board.risk_level.as_str())
        .bind(board.status.as_str())
        .bind(board.final_verdict.map(|v| v.as_str()))
        .bind(&board.aggregated_feedback)
        .bind(board.created_at.to_rfc3339())
        .bind(board.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_board(&self, board_id: &str) -> DomainResult<Option<ReviewBoard>> {
        let row: Option<BoardRow> = sqlx::query_as("SELECT * FROM review_boards WHERE board_id = ?")
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_boards(&self, status: Option<BoardStatus>) -> DomainResult<Vec<ReviewBoard>> {
        let rows: Vec<BoardRow> = if let Some(status) = status {
            sqlx::query_as("SELECT * FROM review_boards WHERE status = ? ORDER BY created_at DESC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as("SELECT * FROM review_boards ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_board_status(&self, board_id: &str, status: BoardStatus) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE review_boards SET status = ? WHERE board_id = ? AND status != 'completed'",
        )
        .bind(status.as_str())
        .bind(board_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either missing or already completed; distinguish for the caller.
            return match self.get_board(board_id).await? {
                Some(_) => Err(DomainError::Conflict(format!("board {board_id} already completed"))),
                None => Err(DomainError::BoardNotFound(board_id.to_string())),
            };
        }
        Ok(())
    }

    async fn finalize_board(
        &self,
        board_id: &str,
        verdict: Verdict,
        aggregated_feedback: &str,
        completed_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE review_boards SET status = 'completed', final_verdict = ?,
               aggregated_feedback = ?, completed_at = ?
               WHERE board_id = ? AND status != 'completed'"#,
        )
        .bind(verdict.as_str())
        .bind(aggregated_feedback)
        .bind(completed_at.to_rfc3339())
        .bind(board_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_board(board_id).await? {
                Some(_) => Err(DomainError::Conflict(format!("board {board_id} already finalized"))),
                None => Err(DomainError::BoardNotFound(board_id.to_string())),
            };
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_vote(&self, vote: &ReviewerVote) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO reviewer_votes (vote_id, board_id, reviewer_id, approved,
               confidence_score, defects_found, tokens_used, notes, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&vote.vote_id)
        .bind(&vote.board_id)
        .bind(&vote.reviewer_id)
        .bind(i32::from(vote.approved))
        .bind(i64::from(vote.confidence_score))
        .bind(i64::from(vote.defects_found))
        .bind(i64::try_from(vote.tokens_used).unwrap_or(i64::MAX))
        .bind(&vote.notes)
        .bind(vote.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE") => {
                Err(DomainError::DuplicateVote {
                    board_id: vote.board_id.clone(),
                    reviewer_id: vote.reviewer_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_votes(&self, board_id: &str) -> DomainResult<Vec<ReviewerVote>> {
        let rows: Vec<VoteRow> = sqlx::query_as(
            "SELECT * FROM reviewer_votes WHERE board_id = ? ORDER BY created_at, vote_id",
        )
        .bind(board_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_defect(&self, defect: &Defect) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO defects (defect_id, board_id, reviewer_id, category, severity, title,
               description, file_path, line_start, line_end, suggested_fix, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&defect.defect_id)
        .bind(&defect.board_id)
        .bind(&defect.reviewer_id)
        .bind(&defect.category)
        .bind(defect.severity.as_str())
        .bind(&defect.title)
        .bind(&defect.description)
        .bind(defect.file_path.as_deref())
        .bind(defect.line_start.map(i64::from))
        .bind(defect.line_end.map(i64::from))
        .bind(defect.suggested_fix.as_deref())
        .bind(defect.status.as_str())
        .bind(defect.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_defects(&self, board_id: &str) -> DomainResult<Vec<Defect>> {
        let rows: Vec<DefectRow> =
            sqlx::query_as("SELECT * FROM defects WHERE board_id = ? ORDER BY created_at")
                .bind(board_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_defect_status(&self, defect_id: &str, status: DefectStatus) -> DomainResult<()> {
        let result = sqlx::query("UPDATE defects SET status = ? WHERE defect_id = ?")
            .bind(status.as_str())
            .bind(defect_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::BoardNotFound(format!("defect {defect_id}")));
        }
        Ok(())
    }

    async fn get_reviewer_stats(&self, reviewer_id: &str) -> DomainResult<Option<ReviewerStats>> {
        let row: Option<StatsRow> =
            sqlx::query_as("SELECT * FROM reviewer_stats WHERE reviewer_id = ?")
                .bind(reviewer_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn upsert_reviewer_stats(&self, stats: &ReviewerStats) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO reviewer_stats (reviewer_id, participations, consensus_matches,
               defects_submitted, quality_score, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(reviewer_id) DO UPDATE SET
                 participations = excluded.participations,
                 consensus_matches = excluded.consensus_matches,
                 defects_submitted = excluded.defects_submitted,
                 quality_score = excluded.quality_score,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&stats.reviewer_id)
        .bind(i64::from(stats.participations))
        .bind(i64::from(stats.consensus_matches))
        .bind(i64::from(stats.defects_submitted))
        .bind(stats.quality_score)
        .bind(stats.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn leaderboard(&self, limit: u32) -> DomainResult<Vec<LeaderboardEntry>> {
        let rows: Vec<StatsRow> = sqlx::query_as(
            "SELECT * FROM reviewer_stats ORDER BY quality_score DESC, participations DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let stats: ReviewerStats = row.try_into()?;
                Ok(LeaderboardEntry {
                    reviewer_id: stats.reviewer_id.clone(),
                    participations: stats.participations,
                    accuracy: stats.accuracy(),
                    defects_submitted: stats.defects_submitted,
                    quality_score: stats.quality_score,
                })
            })
            .collect()
    }

    async fn defect_categories(&self) -> DomainResult<Vec<DefectCategoryCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM defects GROUP BY category ORDER BY COUNT(*) DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(category, count)| DefectCategoryCount {
                category,
                count: u64::try_from(count).unwrap_or(0),
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct BoardRow {
    board_id: String,
    assignment_id: String,
    reviewer_count: i64,
    complexity_score: i64,
    risk_level: String,
    status: String,
    final_verdict: Option<String>,
    aggregated_feedback: String,
    created_at: String,
    completed_at: Option<String>,
}

impl TryFrom<BoardRow> for ReviewBoard {
    type Error = DomainError;

    fn try_from(row: BoardRow) -> Result<Self, Self::Error> {
        let risk_level = RiskLevel::parse_str(&row.risk_level)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid risk: {}", row.risk_level)))?;
        let status = BoardStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let final_verdict = row
            .final_verdict
            .as_deref()
            .map(|v| {
                Verdict::parse_str(v)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid verdict: {v}")))
            })
            .transpose()?;

        Ok(ReviewBoard {
            board_id: row.board_id,
            assignment_id: row.assignment_id,
            reviewer_count: u32::try_from(row.reviewer_count.max(1)).unwrap_or(1),
            complexity_score: u32::try_from(row.complexity_score.max(0)).unwrap_or(0),
            risk_level,
            status,
            final_verdict,
            aggregated_feedback: row.aggregated_feedback,
            created_at: super::parse_datetime(&row.created_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    vote_id: String,
    board_id: String,
    reviewer_id: String,
    approved: i32,
    confidence_score: i64,
    defects_found: i64,
    tokens_used: i64,
    notes: String,
    created_at: String,
}

impl TryFrom<VoteRow> for ReviewerVote {
    type Error = DomainError;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        Ok(ReviewerVote {
            vote_id: row.vote_id,
            board_id: row.board_id,
            reviewer_id: row.reviewer_id,
            approved: row.approved != 0,
            confidence_score: u32::try_from(row.confidence_score.clamp(0, 100)).unwrap_or(0),
            defects_found: u32::try_from(row.defects_found.max(0)).unwrap_or(0),
            tokens_used: u64::try_from(row.tokens_used.max(0)).unwrap_or(0),
            notes: row.notes,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DefectRow {
    defect_id: String,
    board_id: String,
    reviewer_id: String,
    category: String,
    severity: String,
    title: String,
    description: String,
    file_path: Option<String>,
    line_start: Option<i64>,
    line_end: Option<i64>,
    suggested_fix: Option<String>,
    status: String,
    created_at: String,
}

impl TryFrom<DefectRow> for Defect {
    type Error = DomainError;

    fn try_from(row: DefectRow) -> Result<Self, Self::Error> {
        let severity = DefectSeverity::parse_str(&row.severity)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid severity: {}", row.severity)))?;
        let status = DefectStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        Ok(Defect {
            defect_id: row.defect_id,
            board_id: row.board_id,
            reviewer_id: row.reviewer_id,
            category: row.category,
            severity,
            title: row.title,
            description: row.description,
            file_path: row.file_path,
            line_start: row.line_start.and_then(|v| u32::try_from(v).ok()),
            line_end: row.line_end.and_then(|v| u32::try_from(v).ok()),
            suggested_fix: row.suggested_fix,
            status,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    reviewer_id: String,
    participations: i64,
    consensus_matches: i64,
    defects_submitted: i64,
    quality_score: f64,
    updated_at: String,
}

impl TryFrom<StatsRow> for ReviewerStats {
    type Error = DomainError;

    fn try_from(row: StatsRow) -> Result<Self, Self::Error> {
        Ok(ReviewerStats {
            reviewer_id: row.reviewer_id,
            participations: u32::try_from(row.participations.max(0)).unwrap_or(0),
            consensus_matches: u32::try_from(row.consensus_matches.max(0)).unwrap_or(0),
            defects_submitted: u32::try_from(row.defects_submitted.max(0)).unwrap_or(0),
            quality_score: row.quality_score,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}
