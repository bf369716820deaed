//! Repository ports for task persistence, the execution attempt ledger, and
//! lineage reads.

use crate::task::domain::{
    AttemptId, AttemptNumber, Chain, ChainId, ExecutionAttempt, LineageEdge, NewTaskRecord, Task,
    TaskId, TaskListQuery, TaskStatus,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for task repository operations.
pub type TaskRepositoryResult<T> = Result<T, TaskRepositoryError>;

/// One page of a task listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPage {
    /// Tasks on this page, newest first.
    pub tasks: Vec<Task>,
    /// Number of tasks matching the filter across all pages.
    pub total_count: u64,
    /// Whether more tasks follow this page.
    pub has_more: bool,
}

impl TaskPage {
    /// Builds a page, deriving `has_more` from the offset and total.
    #[must_use]
    pub fn new(tasks: Vec<Task>, total_count: u64, offset: u64) -> Self {
        let returned = u64::try_from(tasks.len()).unwrap_or(u64::MAX);
        let has_more = offset.saturating_add(returned) < total_count;
        Self {
            tasks,
            total_count,
            has_more,
        }
    }
}

/// Task store and execution attempt ledger contract.
///
/// Every status write is conditional on the status the caller last
/// observed, so concurrent writers to the same task serialize on the store.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Stores a new task together with its lineage write.
    ///
    /// The task row, any chain it creates, and its lineage edge are written
    /// atomically.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DuplicateTask`] when the task ID already
    /// exists or [`TaskRepositoryError::ParentNotFound`] when the lineage
    /// parent is missing.
    async fn store(&self, record: &NewTaskRecord) -> TaskRepositoryResult<()>;

    /// Stores several new tasks all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered; no record is stored in that case.
    async fn store_batch(&self, records: &[NewTaskRecord]) -> TaskRepositoryResult<()>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<Task>>;

    /// Finds several tasks, returning them in the order requested and
    /// skipping identifiers that do not exist.
    async fn find_many(&self, ids: &[TaskId]) -> TaskRepositoryResult<Vec<Task>>;

    /// Returns one page of tasks matching `query`, newest first.
    async fn list(&self, query: &TaskListQuery) -> TaskRepositoryResult<TaskPage>;

    /// Overwrites the task row if its stored status still equals `expected`.
    ///
    /// Returns `false` when another writer changed the status first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when the task does not exist.
    async fn update_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> TaskRepositoryResult<bool>;

    /// Atomically moves a task into `running` and opens its attempt.
    ///
    /// The task row is written only if its stored status still equals
    /// `expected`; the attempt row is inserted in the same unit. Returns
    /// `false`, writing nothing, when the status check fails.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DuplicateAttempt`] when the attempt
    /// number is already taken for the task.
    async fn claim(
        &self,
        task: &Task,
        expected: TaskStatus,
        attempt: &ExecutionAttempt,
    ) -> TaskRepositoryResult<bool>;

    /// Records a finished attempt and, if supplied, the task's terminal
    /// state.
    ///
    /// The attempt row is always written. The task row is written only if
    /// its stored status is still `running`; the return value reports
    /// whether it was.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::AttemptNotFound`] when the attempt does
    /// not exist, or [`TaskRepositoryError::AttemptAlreadyRecorded`] when it
    /// already has an outcome.
    async fn record_outcome(
        &self,
        attempt: &ExecutionAttempt,
        task: Option<&Task>,
    ) -> TaskRepositoryResult<bool>;

    /// Finds an attempt by identifier.
    async fn find_attempt(&self, id: AttemptId) -> TaskRepositoryResult<Option<ExecutionAttempt>>;

    /// Returns every attempt for a task ordered by attempt number.
    async fn attempts_for_task(&self, task_id: TaskId)
    -> TaskRepositoryResult<Vec<ExecutionAttempt>>;

    /// Returns the number the next attempt for `task_id` should take.
    async fn next_attempt_number(&self, task_id: TaskId) -> TaskRepositoryResult<AttemptNumber> {
        let attempts = self.attempts_for_task(task_id).await?;
        Ok(attempts
            .last()
            .map_or(AttemptNumber::FIRST, |attempt| attempt.attempt_number().next()))
    }
}

/// Read contract over the canonical lineage edge set.
#[async_trait]
pub trait LineageRepository: Send + Sync {
    /// Returns the edge whose child is `child`, if any.
    async fn parent_edge(&self, child: TaskId) -> TaskRepositoryResult<Option<LineageEdge>>;

    /// Returns the edges whose parent is `parent`, oldest first.
    async fn child_edges(&self, parent: TaskId) -> TaskRepositoryResult<Vec<LineageEdge>>;

    /// Returns the chain containing `task`, either as root or as a member.
    async fn chain_containing(&self, task: TaskId) -> TaskRepositoryResult<Option<Chain>>;

    /// Returns every edge belonging to `chain`, oldest first.
    async fn chain_edges(&self, chain: ChainId) -> TaskRepositoryResult<Vec<LineageEdge>>;
}

/// Errors returned by task repository implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskRepositoryError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The lineage parent of a new task was not found.
    #[error("parent task not found: {0}")]
    ParentNotFound(TaskId),

    /// The attempt number is already recorded for the task.
    #[error("attempt {attempt_number} already recorded for task {task_id}")]
    DuplicateAttempt {
        /// Owning task.
        task_id: TaskId,
        /// Conflicting attempt number.
        attempt_number: AttemptNumber,
    },

    /// The attempt was not found.
    #[error("execution attempt not found: {0}")]
    AttemptNotFound(AttemptId),

    /// The attempt already recorded its outcome and can no longer change.
    #[error("execution attempt already recorded: {0}")]
    AttemptAlreadyRecorded(AttemptId),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
