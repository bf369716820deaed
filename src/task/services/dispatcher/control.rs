//! Caller-issued lifecycle changes: cancel, retry, and requeue.

use super::{Dispatcher, MAX_CAS_ATTEMPTS};
use crate::task::{
    domain::{RetryPolicy, Task, TaskId},
    ports::{TaskRepository, WorkQueue},
    services::{ServiceError, ServiceResult},
};
use mockable::Clock;
use tracing::{info, instrument};

impl<R, Q, C> Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    /// Cancels a pending, queued, or running task.
    ///
    /// A running worker is not signalled; its later result is discarded by
    /// [`Dispatcher::complete_execution`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TaskNotFound`], or a precondition error when
    /// the task is already terminal.
    #[instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: TaskId) -> ServiceResult<Task> {
        let task = self
            .compare_and_apply(task_id, |task, clock| task.cancel(clock))
            .await?;
        info!(%task_id, "task cancelled");
        Ok(task)
    }

    /// Resubmits a failed task that still has retry budget.
    ///
    /// The task moves to `queued` with an incremented `retry_count` and is
    /// then handed to the work queue.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when the task is not failed or its
    /// budget is spent, or [`ServiceError::Unavailable`] when the enqueue
    /// fails; the task then stays `queued` and can be resent with
    /// [`Dispatcher::requeue`].
    #[instrument(skip(self))]
    pub async fn retry_task(&self, task_id: TaskId) -> ServiceResult<Task> {
        let task = self
            .compare_and_apply(task_id, |task, clock| task.retry(clock))
            .await?;
        info!(
            %task_id,
            retry_count = task.retry_count(),
            remaining = RetryPolicy::remaining(&task),
            "task retried"
        );
        self.hand_off(task)
            .await
            .map_err(|err| err.for_task(task_id))
    }

    /// Hands a pending or queued task to the work queue again.
    ///
    /// This is the recovery path for tasks left behind by a failed enqueue.
    ///
    /// # Errors
    ///
    /// Returns a precondition error for tasks that are running or terminal,
    /// or [`ServiceError::Unavailable`] when the enqueue fails.
    #[instrument(skip(self))]
    pub async fn requeue(&self, task_id: TaskId) -> ServiceResult<Task> {
        let task = self.load(task_id).await?;
        task.ensure_requeueable()?;
        self.hand_off(task)
            .await
            .map_err(|err| err.for_task(task_id))
    }

    /// Reads the task, applies `change`, and writes it back conditionally on
    /// the status that was read, retrying when another writer got there
    /// first.
    async fn compare_and_apply<F, E>(&self, task_id: TaskId, change: F) -> ServiceResult<Task>
    where
        F: Fn(&mut Task, &C) -> Result<(), E> + Send + Sync,
        E: Into<ServiceError>,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut task = self.load(task_id).await?;
            let expected = task.status();
            change(&mut task, &*self.clock).map_err(Into::into)?;
            if self.repository.update_if_status(&task, expected).await? {
                return Ok(task);
            }
        }
        Err(ServiceError::ConcurrentModification(task_id))
    }
}
