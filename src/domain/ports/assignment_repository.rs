//! Assignment repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Assignment, AssignmentStatus};

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn create(&self, assignment: &Assignment) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<Assignment>>;

    /// Assignments for one worker, optionally narrowed to a status.
    async fn list_for_agent(
        &self,
        agent_id: &str,
        status: Option<AssignmentStatus>,
    ) -> DomainResult<Vec<Assignment>>;

    async fn update_status(&self, id: &str, status: AssignmentStatus) -> DomainResult<()>;

    /// Terminal completion with final status and feedback, atomically.
    async fn complete(
        &self,
        id: &str,
        status: AssignmentStatus,
        feedback: &str,
    ) -> DomainResult<()>;

    /// Move to rework: increments `review_attempt` and records the
    /// reviewer feedback in the same transaction.
    async fn request_rework(&self, id: &str, feedback: &str) -> DomainResult<Assignment>;
}
