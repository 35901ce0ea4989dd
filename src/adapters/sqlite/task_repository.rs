//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskFilter, TaskStatus};
use crate::domain::ports::TaskRepository;

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO tasks (task_id, description, status, assigned_agent_id, learnings,
               created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&task.task_id)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.assigned_agent_id.as_deref())
        .bind(&task.learnings)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_batch(&self, tasks: &[Task]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            sqlx::query(
                r#"INSERT INTO tasks (task_id, description, status, assigned_agent_id, learnings,
                   created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&task.task_id)
            .bind(&task.description)
            .bind(task.status.as_str())
            .bind(task.assigned_agent_id.as_deref())
            .bind(&task.learnings)
            .bind(task.created_at.to_rfc3339())
            .bind(task.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(agent_id) = &filter.assigned_agent_id {
            sql.push_str(" AND assigned_agent_id = ?");
            bindings.push(agent_id.clone());
        }
        sql.push_str(" ORDER BY created_at");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, TaskRow>(&sql);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> DomainResult<()> {
        let current = self
            .get(task_id)
            .await?
            .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))?;

        if !current.status.can_transition_to(status) {
            return Err(DomainError::InvalidStatusTransition {
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE task_id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn assign(&self, task_id: &str, agent_id: &str) -> DomainResult<()> {
        let current = self
            .get(task_id)
            .await?
            .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))?;

        if let Some(existing) = &current.assigned_agent_id {
            if existing != agent_id && !current.status.is_terminal() {
                return Err(DomainError::Conflict(format!(
                    "task {task_id} already assigned to {existing}"
                )));
            }
        }
        if !current.status.can_transition_to(TaskStatus::Assigned) {
            return Err(DomainError::InvalidStatusTransition {
                from: current.status.as_str().to_string(),
                to: TaskStatus::Assigned.as_str().to_string(),
            });
        }

        sqlx::query(
            "UPDATE tasks SET assigned_agent_id = ?, status = 'assigned', updated_at = ? WHERE task_id = ?",
        )
        .bind(agent_id)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_learnings(&self, task_id: &str, notes: &str) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE tasks SET learnings = CASE WHEN learnings = '' THEN ?
               ELSE learnings || char(10) || ? END, updated_at = ? WHERE task_id = ?"#,
        )
        .bind(notes)
        .bind(notes)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    description: String,
    status: String,
    assigned_agent_id: Option<String>,
    learnings: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::parse_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;

        Ok(Task {
            task_id: row.task_id,
            description: row.description,
            status,
            assigned_agent_id: row.assigned_agent_id,
            learnings: row.learnings,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_repo() -> SqliteTaskRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteTaskRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup_repo().await;
        let task = Task::new("wire the scheduler");
        repo.create(&task).await.unwrap();

        let found = repo.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(found.description, "wire the scheduler");
        assert_eq!(found.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_batch_create_and_filter() {
        let repo = setup_repo().await;
        let tasks: Vec<Task> = (0..3).map(|i| Task::new(format!("task {i}"))).collect();
        repo.create_batch(&tasks).await.unwrap();

        let all = repo.list(TaskFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let limited = repo.list(TaskFilter { limit: Some(2), ..Default::default() }).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_assignment_conflict() {
        let repo = setup_repo().await;
        let task = Task::new("port the parser");
        repo.create(&task).await.unwrap();

        repo.assign(&task.task_id, "coder001").await.unwrap();
        let err = repo.assign(&task.task_id, "coder002").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_status_machine_enforced() {
        let repo = setup_repo().await;
        let task = Task::new("review the diff");
        repo.create(&task).await.unwrap();

        // pending -> completed skips assignment and is rejected.
        let err = repo.update_status(&task.task_id, TaskStatus::Completed).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStatusTransition { .. }));

        repo.assign(&task.task_id, "coder001").await.unwrap();
        repo.update_status(&task.task_id, TaskStatus::InProgress).await.unwrap();
        repo.update_status(&task.task_id, TaskStatus::Blocked).await.unwrap();
        repo.update_status(&task.task_id, TaskStatus::InProgress).await.unwrap();
        repo.update_status(&task.task_id, TaskStatus::Completed).await.unwrap();
    }

    #[tokio::test]
    async fn test_learnings_accumulate() {
        let repo = setup_repo().await;
        let task = Task::new("investigate flake");
        repo.create(&task).await.unwrap();

        repo.append_learnings(&task.task_id, "retries mask the race").await.unwrap();
        repo.append_learnings(&task.task_id, "fixed by pinning the runtime").await.unwrap();

        let found = repo.get(&task.task_id).await.unwrap().unwrap();
        assert!(found.learnings.contains("retries mask the race"));
        assert!(found.learnings.contains("fixed by pinning the runtime"));
    }
}
