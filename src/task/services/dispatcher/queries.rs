//! Read-side operations and the execution metrics projection.

use super::Dispatcher;
use crate::task::{
    domain::{ExecutionAttempt, Task, TaskId, TaskListQuery},
    ports::{TaskPage, TaskRepository, WorkQueue},
    services::ServiceResult,
};
use mockable::Clock;

/// A task together with its most recent execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDetails {
    /// The task.
    pub task: Task,
    /// Attempt with the highest attempt number, if the task ever ran.
    pub latest_execution: Option<ExecutionAttempt>,
}

impl<R, Q, C> Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    /// Fetches a task.
    ///
    /// # Errors
    ///
    /// Returns [`super::ServiceError::TaskNotFound`] when the task does not
    /// exist.
    pub async fn get_task(&self, task_id: TaskId) -> ServiceResult<Task> {
        self.load(task_id).await
    }

    /// Fetches a task with its latest execution metrics.
    ///
    /// # Errors
    ///
    /// Returns [`super::ServiceError::TaskNotFound`] when the task does not
    /// exist.
    pub async fn get_task_details(&self, task_id: TaskId) -> ServiceResult<TaskDetails> {
        let task = self.load(task_id).await?;
        let latest_execution = self
            .repository
            .attempts_for_task(task_id)
            .await?
            .into_iter()
            .max_by_key(ExecutionAttempt::attempt_number);
        Ok(TaskDetails {
            task,
            latest_execution,
        })
    }

    /// Lists every attempt for a task ordered by attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`super::ServiceError::TaskNotFound`] when the task does not
    /// exist.
    pub async fn list_executions(&self, task_id: TaskId) -> ServiceResult<Vec<ExecutionAttempt>> {
        self.load(task_id).await?;
        Ok(self.repository.attempts_for_task(task_id).await?)
    }

    /// Returns one page of tasks, newest first.
    ///
    /// # Errors
    ///
    /// Returns a repository error when the listing cannot be read.
    pub async fn list_tasks(&self, query: &TaskListQuery) -> ServiceResult<TaskPage> {
        Ok(self.repository.list(query).await?)
    }
}
