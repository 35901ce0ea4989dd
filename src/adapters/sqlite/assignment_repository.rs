//! SQLite implementation of the AssignmentRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Assignment, AssignmentStatus};
use crate::domain::ports::AssignmentRepository;

#[derive(Clone)]
pub struct SqliteAssignmentRepository {
    pool: SqlitePool,
}

impl SqliteAssignmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssignmentRepository for SqliteAssignmentRepository {
    async fn create(&self, assignment: &Assignment) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO assignments (id, task_id, assigned_to, assigned_by, branch_name,
               status, review_attempt, feedback, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&assignment.id)
        .bind(&assignment.task_id)
        .bind(&assignment.assigned_to)
        .bind(&assignment.assigned_by)
        .bind(&assignment.branch_name)
        .bind(assignment.status.as_str())
        .bind(i64::from(assignment.review_attempt))
        .bind(&assignment.feedback)
        .bind(assignment.created_at.to_rfc3339())
        .bind(assignment.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as("SELECT * FROM assignments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_agent(
        &self,
        agent_id: &str,
        status: Option<AssignmentStatus>,
    ) -> DomainResult<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = if let Some(status) = status {
            sqlx::query_as(
                "SELECT * FROM assignments WHERE assigned_to = ? AND status = ? ORDER BY created_at",
            )
            .bind(agent_id)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as("SELECT * FROM assignments WHERE assigned_to = ? ORDER BY created_at")
                .bind(agent_id)
                .fetch_all(&self.pool)
                .await?
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status(&self, id: &str, status: AssignmentStatus) -> DomainResult<()> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| DomainError::AssignmentNotFound(id.to_string()))?;

        if current.status.is_terminal() {
            return Err(DomainError::InvalidStatusTransition {
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        sqlx::query("UPDATE assignments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn complete(
        &self,
        id: &str,
        status: AssignmentStatus,
        feedback: &str,
    ) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE assignments SET status = ?, feedback = ?, updated_at = ?
               WHERE id = ? AND status NOT IN ('approved', 'escalated')"#,
        )
        .bind(status.as_str())
        .bind(feedback)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::Conflict(format!(
                "assignment {id} is terminal or missing"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn request_rework(&self, id: &str, feedback: &str) -> DomainResult<Assignment> {
        // Attempt increment, status flip, and feedback land atomically so a
        // crash can never leave a rework row at its old attempt count.
        let mut tx = self.pool.begin().await?;

        let row: Option<AssignmentRow> = sqlx::query_as("SELECT * FROM assignments WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let current: Assignment = row
            .ok_or_else(|| DomainError::AssignmentNotFound(id.to_string()))?
            .try_into()?;

        if current.status.is_terminal() {
            return Err(DomainError::InvalidStatusTransition {
                from: current.status.as_str().to_string(),
                to: AssignmentStatus::Rework.as_str().to_string(),
            });
        }

        let next_attempt = current.review_attempt + 1;
        sqlx::query(
            "UPDATE assignments SET status = 'rework', review_attempt = ?, feedback = ?, updated_at = ? WHERE id = ?",
        )
        .bind(i64::from(next_attempt))
        .bind(feedback)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get(id)
            .await?
            .ok_or_else(|| DomainError::AssignmentNotFound(id.to_string()))
    }
}

#[derive(sqlx::FromRow)]
struct AssignmentRow {
    id: String,
    task_id: String,
    assigned_to: String,
    assigned_by: String,
    branch_name: String,
    status: String,
    review_attempt: i64,
    feedback: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = DomainError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let status = AssignmentStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        Ok(Assignment {
            id: row.id,
            task_id: row.task_id,
            assigned_to: row.assigned_to,
            assigned_by: row.assigned_by,
            branch_name: row.branch_name,
            status,
            review_attempt: u32::try_from(row.review_attempt.max(1)).unwrap_or(1),
            feedback: row.feedback,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::adapters::sqlite::task_repository::SqliteTaskRepository;
    use crate::domain::models::Task;
    use crate::domain::ports::TaskRepository;

    async fn setup() -> (SqliteAssignmentRepository, String) {
        let pool = create_migrated_test_pool().await.unwrap();
        let tasks = SqliteTaskRepository::new(pool.clone());
        let task = Task::new("build the codec");
        tasks.create(&task).await.unwrap();
        (SqliteAssignmentRepository::new(pool), task.task_id)
    }

    #[tokio::test]
    async fn test_create_and_list_for_agent() {
        let (repo, task_id) = setup().await;
        let assignment = Assignment::new(&task_id, "coder001", "sgt001").with_branch("feat/codec");
        repo.create(&assignment).await.unwrap();

        let mine = repo.list_for_agent("coder001", None).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].branch_name, "feat/codec");
        assert_eq!(mine[0].review_attempt, 1);

        let pending = repo
            .list_for_agent("coder001", Some(AssignmentStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_rework_increments_attempt_and_attaches_feedback() {
        let (repo, task_id) = setup().await;
        let assignment = Assignment::new(&task_id, "coder001", "sgt001");
        repo.create(&assignment).await.unwrap();

        let reworked = repo.request_rework(&assignment.id, "missing error paths").await.unwrap();
        assert_eq!(reworked.status, AssignmentStatus::Rework);
        assert_eq!(reworked.review_attempt, 2);
        assert_eq!(reworked.feedback, "missing error paths");

        let again = repo.request_rework(&assignment.id, "still failing").await.unwrap();
        assert_eq!(again.review_attempt, 3);
    }

    #[tokio::test]
    async fn test_terminal_rows_reject_mutation() {
        let (repo, task_id) = setup().await;
        let assignment = Assignment::new(&task_id, "coder001", "sgt001");
        repo.create(&assignment).await.unwrap();

        repo.update_status(&assignment.id, AssignmentStatus::Escalated).await.unwrap();

        let err = repo.request_rework(&assignment.id, "too late").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));

        let err = repo.update_status(&assignment.id, AssignmentStatus::InProgress).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn test_complete_sets_feedback() {
        let (repo, task_id) = setup().await;
        let assignment = Assignment::new(&task_id, "coder001", "sgt001");
        repo.create(&assignment).await.unwrap();

        repo.complete(&assignment.id, AssignmentStatus::Approved, "clean diff").await.unwrap();
        let found = repo.get(&assignment.id).await.unwrap().unwrap();
        assert_eq!(found.status, AssignmentStatus::Approved);
        assert_eq!(found.feedback, "clean diff");

        let err = repo
            .complete(&assignment.id, AssignmentStatus::Completed, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
