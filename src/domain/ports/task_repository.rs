//! Task repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskFilter, TaskStatus};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> DomainResult<()>;

    /// Insert several tasks in one transaction.
    async fn create_batch(&self, tasks: &[Task]) -> DomainResult<()>;

    async fn get(&self, task_id: &str) -> DomainResult<Option<Task>>;

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Validates the transition against the task state machine.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> DomainResult<()>;

    async fn assign(&self, task_id: &str, agent_id: &str) -> DomainResult<()>;

    async fn append_learnings(&self, task_id: &str, notes: &str) -> DomainResult<()>;
}
