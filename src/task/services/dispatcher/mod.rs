//! Dispatcher: submission, queue hand-off, worker claims, completion, and
//! caller-issued cancel and retry.
//!
//! Every status write goes through a conditional repository update keyed on
//! the status the dispatcher last read, so a lost race is detected rather
//! than overwritten.

mod control;
mod execution;
mod queries;
mod submit;

pub use execution::{ClaimOutcome, ClaimedExecution, CompletionOutcome};
pub(crate) use execution::UnrecordedResult;
pub use queries::TaskDetails;
pub use submit::{CreateTaskFromTemplateRequest, CreateTaskRequest, batch_requests_from_lines};

use super::{ServiceError, ServiceResult};
use crate::task::{
    domain::{RetryPolicy, Task, TaskId, TaskLimits, TaskStatus},
    ports::{QueuedTask, TaskRepository, WorkQueue, WorkQueueError},
};
use mockable::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Bound on compare-and-swap retries before reporting contention.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Default deadline for a single enqueue call.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Tunable dispatcher behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Submission bounds.
    pub limits: TaskLimits,
    /// Retry budget policy.
    pub retry_policy: RetryPolicy,
    /// Deadline applied to each enqueue call.
    pub enqueue_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            limits: TaskLimits::default(),
            retry_policy: RetryPolicy::default(),
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

/// Task orchestration service.
pub struct Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    queue: Arc<Q>,
    clock: Arc<C>,
    settings: DispatcherSettings,
    unrecorded: Arc<Mutex<HashMap<TaskId, UnrecordedResult>>>,
}

impl<R, Q, C> Clone for Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            queue: Arc::clone(&self.queue),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
            unrecorded: Arc::clone(&self.unrecorded),
        }
    }
}

impl<R, Q, C> Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    /// Creates a dispatcher with default settings.
    #[must_use]
    pub fn new(repository: Arc<R>, queue: Arc<Q>, clock: Arc<C>) -> Self {
        Self {
            repository,
            queue,
            clock,
            settings: DispatcherSettings::default(),
            unrecorded: Arc::default(),
        }
    }

    /// Replaces the dispatcher settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the active settings.
    #[must_use]
    pub const fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    async fn load(&self, task_id: TaskId) -> ServiceResult<Task> {
        self.repository
            .find_by_id(task_id)
            .await?
            .ok_or(ServiceError::TaskNotFound(task_id))
    }

    /// Sends one message to the queue under the configured deadline.
    async fn enqueue_bounded(&self, task: &Task) -> Result<(), WorkQueueError> {
        let message = QueuedTask::from(task);
        let timeout = self.settings.enqueue_timeout;
        match tokio::time::timeout(timeout, self.queue.enqueue(&message)).await {
            Ok(result) => result,
            Err(_) => Err(WorkQueueError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Hands a pending or queued task to the work queue.
    ///
    /// A pending task is moved to `queued` only after the queue confirms the
    /// message. If a worker has already moved the task further, the fresher
    /// stored state is returned instead.
    async fn hand_off(&self, task: Task) -> Result<Task, HandOffError> {
        if let Err(source) = self.enqueue_bounded(&task).await {
            warn!(task_id = %task.id(), error = %source, "enqueue failed; task stays {}", task.status());
            return Err(HandOffError::Queue(source));
        }
        if task.status() != TaskStatus::Pending {
            return Ok(task);
        }

        let mut queued = task.clone();
        queued
            .transition_to(TaskStatus::Queued, &*self.clock)
            .map_err(|err| HandOffError::Service(err.into()))?;
        let applied = self
            .repository
            .update_if_status(&queued, TaskStatus::Pending)
            .await
            .map_err(|err| HandOffError::Service(err.into()))?;
        if applied {
            info!(task_id = %queued.id(), "task queued");
            return Ok(queued);
        }
        self.load(task.id()).await.map_err(HandOffError::Service)
    }

    /// Hands several tasks to the queue, reporting every task the queue
    /// refused.
    async fn hand_off_all(&self, tasks: Vec<Task>) -> ServiceResult<Vec<Task>> {
        let mut dispatched = Vec::with_capacity(tasks.len());
        let mut refused = Vec::new();
        let mut last_queue_error = None;
        for task in tasks {
            let task_id = task.id();
            match self.hand_off(task).await {
                Ok(updated) => dispatched.push(updated),
                Err(HandOffError::Queue(err)) => {
                    refused.push(task_id);
                    last_queue_error = Some(err);
                }
                Err(HandOffError::Service(err)) => return Err(err),
            }
        }
        match last_queue_error {
            Some(source) => Err(ServiceError::Unavailable {
                task_ids: refused,
                source,
            }),
            None => Ok(dispatched),
        }
    }
}

enum HandOffError {
    Queue(WorkQueueError),
    Service(ServiceError),
}

impl HandOffError {
    /// Converts a single-task hand-off failure into a service error.
    fn for_task(self, task_id: TaskId) -> ServiceError {
        match self {
            Self::Queue(source) => ServiceError::Unavailable {
                task_ids: vec![task_id],
                source,
            },
            Self::Service(inner) => inner,
        }
    }
}
