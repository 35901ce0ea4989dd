//! Review board service: convenes boards, records votes and defects, and
//! computes the consensus verdict that drives rework or escalation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Assignment, AssignmentStatus, BoardStatus, Defect, DefectSeverity, DefectStatus, Document,
    Event, EventPriority, EventType, ReviewBoard, ReviewerStats, ReviewerVote, RiskLevel, Verdict,
};
use crate::domain::ports::{AssignmentRepository, MemoryRepository, ReviewRepository};
use crate::services::event_bus::EventBus;

/// Result of finalizing a board.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub board_id: String,
    pub verdict: Verdict,
    pub votes_for: u32,
    pub votes_against: u32,
    pub critical_defects: u32,
    pub aggregated_feedback: String,
    /// Assignment status after the decision was applied
    pub assignment_status: AssignmentStatus,
    pub review_attempt: u32,
}

pub struct ReviewBoardService {
    reviews: Arc<dyn ReviewRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    memory: Arc<dyn MemoryRepository>,
    bus: EventBus,
    max_review_cycles: u32,
}

impl ReviewBoardService {
    pub fn new(
        reviews: Arc<dyn ReviewRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        memory: Arc<dyn MemoryRepository>,
        bus: EventBus,
        max_review_cycles: u32,
    ) -> Self {
        Self { reviews, assignments, memory, bus, max_review_cycles }
    }

    /// Convene a board for an assignment's current review attempt.
    pub async fn create_board(
        &self,
        assignment_id: &str,
        reviewer_count: i64,
        risk_level: RiskLevel,
        complexity_score: u32,
    ) -> DomainResult<ReviewBoard> {
        let assignment = self
            .assignments
            .get(assignment_id)
            .await?
            .ok_or_else(|| DomainError::AssignmentNotFound(assignment_id.to_string()))?;

        if assignment.status.is_terminal() {
            return Err(DomainError::Conflict(format!(
                "assignment {assignment_id} is terminal"
            )));
        }

        let board = ReviewBoard::new(assignment_id, reviewer_count, risk_level)
            .with_complexity(complexity_score);
        self.reviews.create_board(&board).await?;
        info!(
            board_id = %board.board_id,
            assignment_id,
            reviewers = board.reviewer_count,
            risk = risk_level.as_str(),
            "review board convened"
        );
        Ok(board)
    }

    /// Record one reviewer's vote; the board moves to in_progress on the
    /// first vote. Duplicate votes are a conflict.
    pub async fn record_vote(&self, vote: ReviewerVote) -> DomainResult<()> {
        let board = self
            .reviews
            .get_board(&vote.board_id)
            .await?
            .ok_or_else(|| DomainError::BoardNotFound(vote.board_id.clone()))?;

        if board.status == BoardStatus::Completed {
            return Err(DomainError::Conflict(format!(
                "board {} already completed",
                vote.board_id
            )));
        }

        self.reviews.record_vote(&vote).await?;
        if board.status == BoardStatus::Pending {
            self.reviews.update_board_status(&vote.board_id, BoardStatus::InProgress).await?;
        }
        Ok(())
    }

    /// File a defect against a live board.
    pub async fn submit_defect(&self, defect: Defect) -> DomainResult<()> {
        let board = self
            .reviews
            .get_board(&defect.board_id)
            .await?
            .ok_or_else(|| DomainError::BoardNotFound(defect.board_id.clone()))?;

        if board.status == BoardStatus::Completed {
            return Err(DomainError::Conflict(format!(
                "board {} already completed",
                defect.board_id
            )));
        }

        self.reviews.create_defect(&defect).await?;
        Ok(())
    }

    /// Compute the consensus, persist the verdict, update reviewer quality
    /// scores, save the rendered report, and apply the decision to the
    /// owning assignment.
    pub async fn finalize(&self, board_id: &str) -> DomainResult<ConsensusOutcome> {
        let board = self
            .reviews
            .get_board(board_id)
            .await?
            .ok_or_else(|| DomainError::BoardNotFound(board_id.to_string()))?;

        if board.status == BoardStatus::Completed {
            return Err(DomainError::Conflict(format!("board {board_id} already finalized")));
        }

        let votes = self.reviews.list_votes(board_id).await?;
        let defects = self.reviews.list_defects(board_id).await?;

        let decision = compute_consensus(&board, &votes, &defects);

        self.reviews
            .finalize_board(board_id, decision.verdict, &decision.aggregated_feedback, Utc::now())
            .await?;

        self.update_reviewer_stats(&votes, &defects, decision.verdict).await;

        let assignment = self
            .assignments
            .get(&board.assignment_id)
            .await?
            .ok_or_else(|| DomainError::AssignmentNotFound(board.assignment_id.clone()))?;

        let (assignment_status, review_attempt) =
            self.apply_decision(&assignment, decision.verdict, &decision.aggregated_feedback).await?;

        let report = render_report(&board, &votes, &defects, decision.verdict, &decision.aggregated_feedback);
        let document = Document::new(&assignment.assigned_by, format!("Review board {board_id}"), report)
            .with_doc_type("board_report");
        if let Err(e) = self.memory.save_document(&document).await {
            warn!(board_id, error = %e, "failed to save board report");
        }

        self.bus
            .publish(
                Event::new(EventType::Message, "review_board", &assignment.assigned_to)
                    .with_priority(EventPriority::High)
                    .with_payload(json!({
                        "board_id": board_id,
                        "verdict": decision.verdict.as_str(),
                        "assignment_id": &assignment.id,
                        "assignment_status": assignment_status.as_str(),
                        "feedback": &decision.aggregated_feedback,
                    })),
            )
            .await;

        info!(
            board_id,
            verdict = decision.verdict.as_str(),
            votes_for = decision.votes_for,
            votes_against = decision.votes_against,
            "board finalized"
        );

        Ok(ConsensusOutcome {
            board_id: board_id.to_string(),
            verdict: decision.verdict,
            votes_for: decision.votes_for,
            votes_against: decision.votes_against,
            critical_defects: decision.critical_defects,
            aggregated_feedback: decision.aggregated_feedback,
            assignment_status,
            review_attempt,
        })
    }

    async fn update_reviewer_stats(&self, votes: &[ReviewerVote], defects: &[Defect], verdict: Verdict) {
        let consensus_approved = verdict == Verdict::Approved;
        join_all(votes.iter().map(|vote| self.update_one_reviewer(vote, defects, consensus_approved)))
            .await;
    }

    async fn update_one_reviewer(&self, vote: &ReviewerVote, defects: &[Defect], consensus_approved: bool) {
        let mut stats = match self.reviews.get_reviewer_stats(&vote.reviewer_id).await {
            Ok(Some(stats)) => stats,
            Ok(None) => ReviewerStats::new(&vote.reviewer_id),
            Err(e) => {
                warn!(reviewer_id = %vote.reviewer_id, error = %e, "failed to load reviewer stats");
                return;
            }
        };

        stats.participations += 1;
        if vote.approved == consensus_approved {
            stats.consensus_matches += 1;
        }
        stats.defects_submitted += u32::try_from(
            defects.iter().filter(|d| d.reviewer_id == vote.reviewer_id).count(),
        )
        .unwrap_or(0);
        stats.quality_score = stats.accuracy();
        stats.updated_at = Utc::now();

        if let Err(e) = self.reviews.upsert_reviewer_stats(&stats).await {
            warn!(reviewer_id = %vote.reviewer_id, error = %e, "failed to save reviewer stats");
        }
    }

    /// Route the verdict into the assignment: approval completes it,
    /// rejection either requests rework or escalates at the cycle cap.
    async fn apply_decision(
        &self,
        assignment: &Assignment,
        verdict: Verdict,
        feedback: &str,
    ) -> DomainResult<(AssignmentStatus, u32)> {
        match verdict {
            Verdict::Approved => {
                self.assignments
                    .complete(&assignment.id, AssignmentStatus::Approved, feedback)
                    .await?;
                Ok((AssignmentStatus::Approved, assignment.review_attempt))
            }
            Verdict::Escalated => {
                self.assignments
                    .complete(&assignment.id, AssignmentStatus::Escalated, feedback)
                    .await?;
                Ok((AssignmentStatus::Escalated, assignment.review_attempt))
            }
            Verdict::Rejected => {
                if assignment.can_rework(self.max_review_cycles) {
                    let reworked = self.assignments.request_rework(&assignment.id, feedback).await?;
                    Ok((AssignmentStatus::Rework, reworked.review_attempt))
                } else {
                    self.assignments
                        .complete(&assignment.id, AssignmentStatus::Escalated, feedback)
                        .await?;
                    Ok((AssignmentStatus::Escalated, assignment.review_attempt))
                }
            }
        }
    }
}

struct Decision {
    verdict: Verdict,
    votes_for: u32,
    votes_against: u32,
    critical_defects: u32,
    aggregated_feedback: String,
}

/// The consensus rule, pure over the recorded votes and defects.
///
/// Non-voters are abstentions: only explicit reject votes count against.
/// Any critical defect forces rejection. A high-risk board cannot approve
/// while a high-severity defect remains unresolved.
fn compute_consensus(board: &ReviewBoard, votes: &[ReviewerVote], defects: &[Defect]) -> Decision {
    let critical_defects =
        u32::try_from(defects.iter().filter(|d| d.severity == DefectSeverity::Critical).count())
            .unwrap_or(u32::MAX);

    if votes.is_empty() {
        return Decision {
            verdict: Verdict::Escalated,
            votes_for: 0,
            votes_against: 0,
            critical_defects,
            aggregated_feedback: format!(
                "No votes were recorded for board {} ({} reviewers expected); escalating for human review.",
                board.board_id, board.reviewer_count
            ),
        };
    }

    let votes_for = u32::try_from(votes.iter().filter(|v| v.approved).count()).unwrap_or(0);
    let votes_against = u32::try_from(votes.iter().filter(|v| !v.approved).count()).unwrap_or(0);

    let aggregated_feedback = votes
        .iter()
        .map(|v| {
            if v.notes.is_empty() {
                format!("{}: ({})", v.reviewer_id, if v.approved { "approved" } else { "rejected" })
            } else {
                format!("{}: {}", v.reviewer_id, v.notes)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let unresolved_high = defects
        .iter()
        .any(|d| d.severity == DefectSeverity::High && d.status != DefectStatus::Resolved);

    let verdict = if critical_defects > 0 {
        Verdict::Rejected
    } else if votes_for > votes_against
        && !(board.risk_level == RiskLevel::High && unresolved_high)
    {
        Verdict::Approved
    } else {
        Verdict::Rejected
    };

    Decision { verdict, votes_for, votes_against, critical_defects, aggregated_feedback }
}

fn render_report(
    board: &ReviewBoard,
    votes: &[ReviewerVote],
    defects: &[Defect],
    verdict: Verdict,
    feedback: &str,
) -> String {
    let mut report = String::new();
    report.push_str(&format!("# Review board {}\n\n", board.board_id));
    report.push_str(&format!("- Assignment: {}\n", board.assignment_id));
    report.push_str(&format!("- Risk level: {}\n", board.risk_level.as_str()));
    report.push_str(&format!("- Reviewers: {}\n", board.reviewer_count));
    report.push_str(&format!("- Verdict: **{}**\n\n", verdict.as_str()));

    report.push_str("## Votes\n\n");
    for vote in votes {
        report.push_str(&format!(
            "- {} — {} (confidence {}, defects {})\n",
            vote.reviewer_id,
            if vote.approved { "approve" } else { "reject" },
            vote.confidence_score,
            vote.defects_found,
        ));
    }

    if !defects.is_empty() {
        report.push_str("\n## Defects\n\n");
        for defect in defects {
            report.push_str(&format!(
                "- [{}] {} ({}, {})\n",
                defect.severity.as_str(),
                defect.title,
                defect.category,
                defect.status.as_str(),
            ));
        }
    }

    report.push_str("\n## Feedback\n\n");
    report.push_str(feedback);
    report.push('\n');
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAssignmentRepository, SqliteMemoryRepository,
        SqliteReviewRepository, SqliteTaskRepository,
    };
    use crate::domain::models::{Task, MAX_REVIEW_CYCLES};
    use crate::domain::ports::TaskRepository;

    struct Fixture {
        service: ReviewBoardService,
        assignments: Arc<SqliteAssignmentRepository>,
        memory: Arc<SqliteMemoryRepository>,
        assignment_id: String,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let tasks = SqliteTaskRepository::new(pool.clone());
        let assignments = Arc::new(SqliteAssignmentRepository::new(pool.clone()));
        let reviews = Arc::new(SqliteReviewRepository::new(pool.clone()));
        let memory = Arc::new(SqliteMemoryRepository::new(pool));

        let task = Task::new("implement the wire codec");
        tasks.create(&task).await.unwrap();
        let assignment = Assignment::new(&task.task_id, "coder001", "sgt001");
        assignments.create(&assignment).await.unwrap();

        let service = ReviewBoardService::new(
            reviews,
            assignments.clone(),
            memory.clone(),
            EventBus::new(16),
            MAX_REVIEW_CYCLES,
        );

        Fixture { service, assignments, memory, assignment_id: assignment.id }
    }

    async fn vote(service: &ReviewBoardService, board_id: &str, reviewer: &str, approved: bool, notes: &str) {
        let mut vote = ReviewerVote::new(board_id, reviewer, approved);
        vote.notes = notes.to_string();
        service.record_vote(vote).await.unwrap();
    }

    #[tokio::test]
    async fn test_unanimous_approval() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 3, RiskLevel::Low, 2)
            .await
            .unwrap();

        for reviewer in ["rev001", "rev002", "rev003"] {
            vote(&fx.service, &board.board_id, reviewer, true, "looks good").await;
        }

        let outcome = fx.service.finalize(&board.board_id).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Approved);
        assert_eq!(outcome.votes_for, 3);
        assert_eq!(outcome.assignment_status, AssignmentStatus::Approved);

        let assignment = fx.assignments.get(&fx.assignment_id).await.unwrap().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Approved);
    }

    #[tokio::test]
    async fn test_critical_defect_forces_rejection() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 3, RiskLevel::Low, 5)
            .await
            .unwrap();

        for reviewer in ["rev001", "rev002", "rev003"] {
            vote(&fx.service, &board.board_id, reviewer, true, "fine by me").await;
        }
        fx.service
            .submit_defect(Defect::new(&board.board_id, "rev002", DefectSeverity::Critical, "drops writes"))
            .await
            .unwrap();

        let outcome = fx.service.finalize(&board.board_id).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Rejected);
        assert_eq!(outcome.critical_defects, 1);
        assert_eq!(outcome.assignment_status, AssignmentStatus::Rework);
        assert_eq!(outcome.review_attempt, 2);
    }

    #[tokio::test]
    async fn test_no_votes_escalates() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 3, RiskLevel::Medium, 1)
            .await
            .unwrap();

        let outcome = fx.service.finalize(&board.board_id).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Escalated);
        assert!(outcome.aggregated_feedback.contains("No votes"));
        assert_eq!(outcome.assignment_status, AssignmentStatus::Escalated);
    }

    #[tokio::test]
    async fn test_high_risk_blocks_on_unresolved_high_defect() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 3, RiskLevel::High, 8)
            .await
            .unwrap();

        vote(&fx.service, &board.board_id, "rev001", true, "ok").await;
        vote(&fx.service, &board.board_id, "rev002", true, "ok").await;
        fx.service
            .submit_defect(Defect::new(&board.board_id, "rev003", DefectSeverity::High, "lock inversion"))
            .await
            .unwrap();

        let outcome = fx.service.finalize(&board.board_id).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Rejected);
    }

    #[tokio::test]
    async fn test_abstentions_do_not_count_against() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 5, RiskLevel::Low, 1)
            .await
            .unwrap();

        // 2 approve, 1 reject, 2 abstain: approval carries.
        vote(&fx.service, &board.board_id, "rev001", true, "").await;
        vote(&fx.service, &board.board_id, "rev002", true, "").await;
        vote(&fx.service, &board.board_id, "rev003", false, "needs tests").await;

        let outcome = fx.service.finalize(&board.board_id).await.unwrap();
        assert_eq!(outcome.verdict, Verdict::Approved);
        assert_eq!(outcome.votes_for, 2);
        assert_eq!(outcome.votes_against, 1);
    }

    #[tokio::test]
    async fn test_feedback_aggregated_in_vote_order() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 2, RiskLevel::Low, 1)
            .await
            .unwrap();

        vote(&fx.service, &board.board_id, "rev001", false, "missing edge cases").await;
        vote(&fx.service, &board.board_id, "rev002", false, "agree with rev001").await;

        let outcome = fx.service.finalize(&board.board_id).await.unwrap();
        let lines: Vec<&str> = outcome.aggregated_feedback.lines().collect();
        assert_eq!(lines[0], "rev001: missing edge cases");
        assert_eq!(lines[1], "rev002: agree with rev001");
    }

    #[tokio::test]
    async fn test_three_rejections_escalate() {
        let fx = setup().await;

        for round in 1..=3u32 {
            let board = fx
                .service
                .create_board(&fx.assignment_id, 3, RiskLevel::Low, 3)
                .await
                .unwrap();
            vote(&fx.service, &board.board_id, "rev001", true, "").await;
            vote(&fx.service, &board.board_id, "rev002", false, "broken").await;
            vote(&fx.service, &board.board_id, "rev003", false, "still broken").await;

            let outcome = fx.service.finalize(&board.board_id).await.unwrap();
            assert_eq!(outcome.verdict, Verdict::Rejected);

            if round < 3 {
                assert_eq!(outcome.assignment_status, AssignmentStatus::Rework);
                assert_eq!(outcome.review_attempt, round + 1);
            } else {
                // Attempt counter has reached the cycle cap: human review.
                assert_eq!(outcome.assignment_status, AssignmentStatus::Escalated);
            }
        }

        let assignment = fx.assignments.get(&fx.assignment_id).await.unwrap().unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Escalated);
        assert_eq!(assignment.review_attempt, 3);
    }

    #[tokio::test]
    async fn test_finalize_is_single_shot() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 1, RiskLevel::Low, 1)
            .await
            .unwrap();
        vote(&fx.service, &board.board_id, "rev001", true, "").await;

        fx.service.finalize(&board.board_id).await.unwrap();
        let err = fx.service.finalize(&board.board_id).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_report_saved_as_document() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 1, RiskLevel::Low, 1)
            .await
            .unwrap();
        vote(&fx.service, &board.board_id, "rev001", true, "ship it").await;
        fx.service.finalize(&board.board_id).await.unwrap();

        use crate::domain::ports::MemoryRepository as _;
        let docs = fx.memory.search_documents(&board.board_id, 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_type, "board_report");
        assert!(docs[0].content.contains("**approved**"));
    }

    #[tokio::test]
    async fn test_reviewer_stats_track_consensus() {
        let fx = setup().await;
        let board = fx
            .service
            .create_board(&fx.assignment_id, 3, RiskLevel::Low, 1)
            .await
            .unwrap();

        vote(&fx.service, &board.board_id, "rev001", true, "").await;
        vote(&fx.service, &board.board_id, "rev002", true, "").await;
        vote(&fx.service, &board.board_id, "rev003", false, "dissent").await;
        fx.service.finalize(&board.board_id).await.unwrap();

        let majority = fx.service.reviews.get_reviewer_stats("rev001").await.unwrap().unwrap();
        assert_eq!(majority.participations, 1);
        assert_eq!(majority.consensus_matches, 1);
        assert!((majority.quality_score - 1.0).abs() < f64::EPSILON);

        let dissenter = fx.service.reviews.get_reviewer_stats("rev003").await.unwrap().unwrap();
        assert_eq!(dissenter.participations, 1);
        assert_eq!(dissenter.consensus_matches, 0);
    }

    proptest::proptest! {
        /// The verdict is a pure function of votes and defects: approval
        /// requires a strict majority of cast votes and no critical defect.
        #[test]
        fn prop_consensus_rule(
            approvals in proptest::collection::vec(proptest::bool::ANY, 1..5),
            criticals in 0u32..3,
        ) {
            let board = ReviewBoard::new("a1", approvals.len() as i64, RiskLevel::Low);
            let votes: Vec<ReviewerVote> = approvals
                .iter()
                .enumerate()
                .map(|(i, &approved)| ReviewerVote::new(&board.board_id, format!("rev{i:03}"), approved))
                .collect();
            let defects: Vec<Defect> = (0..criticals)
                .map(|i| Defect::new(&board.board_id, "rev000", DefectSeverity::Critical, format!("d{i}")))
                .collect();

            let decision = compute_consensus(&board, &votes, &defects);
            let votes_for = approvals.iter().filter(|&&a| a).count() as u32;
            let votes_against = approvals.len() as u32 - votes_for;

            if criticals > 0 {
                proptest::prop_assert_eq!(decision.verdict, Verdict::Rejected);
            } else if votes_for > votes_against {
                proptest::prop_assert_eq!(decision.verdict, Verdict::Approved);
            } else {
                proptest::prop_assert_eq!(decision.verdict, Verdict::Rejected);
            }
        }
    }
}
