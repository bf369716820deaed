//! Worker-facing operations: atomic claims and outcome recording.

use super::{Dispatcher, MAX_CAS_ATTEMPTS};
use crate::task::{
    domain::{
        AttemptId, AttemptOutcome, Claimability, ExecutionAttempt, ExecutionReport, Task, TaskId,
        TaskStatus, WorkerId,
    },
    ports::{TaskRepository, TaskRepositoryError, WorkQueue},
    services::{ServiceError, ServiceResult},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::{info, instrument, warn};

/// A successful claim: the task now `running` and its open attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedExecution {
    /// Task as stored after the claim.
    pub task: Task,
    /// Attempt opened by the claim.
    pub attempt: ExecutionAttempt,
}

/// Result of [`Dispatcher::claim_for_execution`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This worker owns the execution.
    Claimed(Box<ClaimedExecution>),
    /// Another worker or a caller already moved the task on; drop the
    /// delivery.
    AlreadyHandled {
        /// Status observed when the claim was refused.
        status: TaskStatus,
    },
    /// The task may not start before `until`.
    Deferred {
        /// Earliest claim time.
        until: DateTime<Utc>,
    },
}

/// Result of [`Dispatcher::complete_execution`].
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The outcome was written to the task.
    Applied(Box<Task>),
    /// The task left `running` first; only the attempt row was written.
    Discarded {
        /// Status that won the race.
        status: TaskStatus,
    },
}

/// A finished attempt whose outcome storage has not accepted yet.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnrecordedResult {
    pub(crate) attempt_id: AttemptId,
    pub(crate) report: ExecutionReport,
}

impl<R, Q, C> Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    /// Claims a task for execution by `worker_id`.
    ///
    /// The task moves to `running` and a new attempt is appended in one
    /// atomic write, conditional on the status read just before. Of two
    /// concurrent claims exactly one succeeds; the other observes
    /// [`ClaimOutcome::AlreadyHandled`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TaskNotFound`] for an unknown task, or
    /// [`ServiceError::ConcurrentModification`] if the status keeps changing
    /// underneath the claim.
    #[instrument(skip(self, worker_id), fields(worker_id = %worker_id))]
    pub async fn claim_for_execution(
        &self,
        task_id: TaskId,
        worker_id: &WorkerId,
    ) -> ServiceResult<ClaimOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let task = self.load(task_id).await?;
            let now = self.clock.utc();
            match task.claimability(now) {
                Claimability::Settled(status) => {
                    warn!(%task_id, %status, "claim refused: task already handled");
                    return Ok(ClaimOutcome::AlreadyHandled { status });
                }
                Claimability::Deferred(until) => {
                    info!(%task_id, %until, "claim deferred");
                    return Ok(ClaimOutcome::Deferred { until });
                }
                Claimability::Claimable => {}
            }

            let expected = task.status();
            let queued_at = (expected == TaskStatus::Queued).then(|| task.updated_at());
            let attempt_number = self.repository.next_attempt_number(task_id).await?;
            let mut running = task;
            running.start(&*self.clock)?;
            let attempt = ExecutionAttempt::begin(
                task_id,
                attempt_number,
                worker_id.clone(),
                queued_at,
                running.started_at().unwrap_or(now),
            );

            match self.repository.claim(&running, expected, &attempt).await {
                Ok(true) => {
                    info!(
                        %task_id,
                        attempt_id = %attempt.id(),
                        attempt_number = attempt_number.value(),
                        "task claimed"
                    );
                    return Ok(ClaimOutcome::Claimed(Box::new(ClaimedExecution {
                        task: running,
                        attempt,
                    })));
                }
                Ok(false) | Err(TaskRepositoryError::DuplicateAttempt { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Err(ServiceError::ConcurrentModification(task_id))
    }

    /// Records the outcome of an attempt.
    ///
    /// The attempt row is always closed. The task takes the outcome only if
    /// it is still `running` at write time; a task cancelled in the meantime
    /// keeps its `cancelled` status and its output and error fields are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AttemptNotFound`],
    /// [`ServiceError::AttemptTaskMismatch`], or a precondition error when
    /// the attempt already has an outcome.
    #[instrument(skip(self, report), fields(outcome = %report.outcome.status()))]
    pub async fn complete_execution(
        &self,
        task_id: TaskId,
        attempt_id: AttemptId,
        report: ExecutionReport,
    ) -> ServiceResult<CompletionOutcome> {
        let mut attempt = self
            .repository
            .find_attempt(attempt_id)
            .await?
            .ok_or(ServiceError::AttemptNotFound(attempt_id))?;
        if attempt.task_id() != task_id {
            return Err(ServiceError::AttemptTaskMismatch {
                task_id,
                attempt_id,
            });
        }
        let outcome = report.outcome.clone();
        attempt.finish(report, &*self.clock)?;

        let task = self.load(task_id).await?;
        let candidate = if task.status() == TaskStatus::Running {
            Some(self.apply_outcome(task, &outcome)?)
        } else {
            None
        };

        let applied = self
            .repository
            .record_outcome(&attempt, candidate.as_ref())
            .await?;
        match candidate {
            Some(updated) if applied => {
                info!(%task_id, %attempt_id, status = %updated.status(), "execution recorded");
                Ok(CompletionOutcome::Applied(Box::new(updated)))
            }
            _ => {
                let status = self.load(task_id).await?.status();
                warn!(
                    %task_id,
                    %attempt_id,
                    %status,
                    "worker result discarded: task is no longer running"
                );
                Ok(CompletionOutcome::Discarded { status })
            }
        }
    }

    fn apply_outcome(&self, mut task: Task, outcome: &AttemptOutcome) -> ServiceResult<Task> {
        match outcome {
            AttemptOutcome::Completed { output } => task.complete(output.as_str(), &*self.clock)?,
            AttemptOutcome::Failed { error_message, .. } => {
                task.fail(error_message.as_str(), &*self.clock)?;
            }
        }
        Ok(task)
    }

    /// Keeps a result that could not be recorded so the next delivery of
    /// the task can submit it again, whichever worker receives it.
    pub(crate) async fn hold_unrecorded(&self, task_id: TaskId, result: UnrecordedResult) {
        warn!(%task_id, attempt_id = %result.attempt_id, "holding unrecorded result");
        self.unrecorded.lock().await.insert(task_id, result);
    }

    /// Removes and returns the held result for `task_id`, if any.
    pub(crate) async fn take_unrecorded(&self, task_id: TaskId) -> Option<UnrecordedResult> {
        self.unrecorded.lock().await.remove(&task_id)
    }
}
