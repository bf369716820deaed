//! Worker execution loop: claim, invoke the language model, record.

use super::{
    ClaimOutcome, ClaimedExecution, CompletionOutcome, Dispatcher, ServiceError, ServiceResult,
    dispatcher::UnrecordedResult,
};
use crate::task::{
    domain::{AttemptOutcome, ExecutionReport, Task, TaskId, TaskStatus, WorkerId},
    ports::{
        Delivery, LlmClient, TaskRepository, TaskRepositoryError, WorkQueue, WorkQueueError,
        WorkSource,
    },
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

/// Default deadline for one language model invocation.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Tries at recording one result before the delivery is returned.
const RECORD_ATTEMPTS: u32 = 3;

/// Pause before the second try at recording a result; doubles per try.
const RECORD_BACKOFF: Duration = Duration::from_millis(50);

/// Counters describing what a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Attempts that completed with output.
    pub completed: u64,
    /// Attempts that failed.
    pub failed: u64,
    /// Results discarded because the task left `running` first.
    pub discarded: u64,
    /// Deliveries dropped because the task was already handled.
    pub skipped: u64,
    /// Deliveries put back until their deferred start.
    pub deferred: u64,
}

impl WorkerStats {
    const fn record(&mut self, handled: Handled) {
        let counter = match handled {
            Handled::Completed => &mut self.completed,
            Handled::Failed => &mut self.failed,
            Handled::Discarded => &mut self.discarded,
            Handled::Skipped => &mut self.skipped,
            Handled::Deferred(_) => &mut self.deferred,
        };
        *counter = counter.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Completed,
    Failed,
    Discarded,
    Skipped,
    Deferred(DateTime<Utc>),
}

impl From<CompletionOutcome> for Handled {
    fn from(outcome: CompletionOutcome) -> Self {
        match outcome {
            CompletionOutcome::Applied(updated) if updated.status() == TaskStatus::Completed => {
                Self::Completed
            }
            CompletionOutcome::Applied(_) => Self::Failed,
            CompletionOutcome::Discarded { .. } => Self::Discarded,
        }
    }
}

/// Pulls deliveries from a [`WorkSource`] and drives each task through
/// claim, invocation, and completion.
pub struct Worker<R, Q, C, L>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
    L: LlmClient,
{
    dispatcher: Dispatcher<R, Q, C>,
    llm: Arc<L>,
    worker_id: WorkerId,
    invoke_timeout: Duration,
}

impl<R, Q, C, L> Worker<R, Q, C, L>
where
    R: TaskRepository + 'static,
    Q: WorkQueue + 'static,
    C: Clock + Send + Sync + 'static,
    L: LlmClient,
{
    /// Creates a worker identified by `worker_id`.
    #[must_use]
    pub const fn new(dispatcher: Dispatcher<R, Q, C>, llm: Arc<L>, worker_id: WorkerId) -> Self {
        Self {
            dispatcher,
            llm,
            worker_id,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Overrides the invocation deadline.
    #[must_use]
    pub const fn with_invoke_timeout(mut self, invoke_timeout: Duration) -> Self {
        self.invoke_timeout = invoke_timeout;
        self
    }

    /// Returns the worker identifier.
    #[must_use]
    pub const fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Runs until `shutdown` turns `true` or the source closes.
    ///
    /// In-flight work is finished before the loop observes shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Unavailable`] when the source fails for any
    /// reason other than being closed.
    #[instrument(skip_all, fields(worker_id = %self.worker_id))]
    pub async fn run<S>(
        &self,
        source: &S,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServiceResult<WorkerStats>
    where
        S: WorkSource,
    {
        let mut stats = WorkerStats::default();
        info!("worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = source.next_delivery() => next,
            };
            match next {
                Ok(Some(delivery)) => self.handle(source, delivery, &mut stats).await,
                Ok(None) | Err(WorkQueueError::Closed) => break,
                Err(source_error) => {
                    error!(error = %source_error, "work source failed");
                    return Err(ServiceError::Unavailable {
                        task_ids: Vec::new(),
                        source: source_error,
                    });
                }
            }
        }
        info!(?stats, "worker stopped");
        Ok(stats)
    }

    /// Processes one delivery and settles it with the source.
    ///
    /// Storage failures return the delivery for redelivery and a deferred
    /// task goes back withheld until its start time; every other outcome
    /// acknowledges it.
    async fn handle<S>(&self, source: &S, delivery: Delivery, stats: &mut WorkerStats)
    where
        S: WorkSource,
    {
        let task_id = delivery.message.task_id;
        let settled = match self.process(task_id).await {
            Ok(Handled::Deferred(until)) => {
                stats.record(Handled::Deferred(until));
                info!(%task_id, %until, "delivery deferred");
                source.defer(delivery.tag, until).await
            }
            Ok(handled) => {
                stats.record(handled);
                source.ack(delivery.tag).await
            }
            Err(err) if is_transient(&err) => {
                warn!(%task_id, error = %err, "delivery returned for redelivery");
                source.nack(delivery.tag).await
            }
            Err(err) => {
                warn!(%task_id, error = %err, "delivery dropped");
                source.ack(delivery.tag).await
            }
        };
        if let Err(err) = settled {
            warn!(%task_id, error = %err, "failed to settle delivery");
        }
    }

    /// Claims, executes, and records one task.
    ///
    /// A result held back by an earlier storage failure is recorded instead
    /// of claiming again.
    async fn process(&self, task_id: TaskId) -> ServiceResult<Handled> {
        if let Some(held) = self.dispatcher.take_unrecorded(task_id).await {
            info!(%task_id, attempt_id = %held.attempt_id, "recording held result");
            return self.record(task_id, held).await;
        }
        match self
            .dispatcher
            .claim_for_execution(task_id, &self.worker_id)
            .await?
        {
            ClaimOutcome::Claimed(claimed) => {
                let ClaimedExecution { task, attempt } = *claimed;
                let report = self.execute(&task).await;
                self.record(
                    task_id,
                    UnrecordedResult {
                        attempt_id: attempt.id(),
                        report,
                    },
                )
                .await
            }
            ClaimOutcome::AlreadyHandled { .. } => Ok(Handled::Skipped),
            ClaimOutcome::Deferred { until } => Ok(Handled::Deferred(until)),
        }
    }

    /// Records a finished attempt, retrying storage failures with backoff.
    ///
    /// A result that still cannot be written is held on the dispatcher and
    /// the error is returned so the delivery comes back.
    async fn record(&self, task_id: TaskId, result: UnrecordedResult) -> ServiceResult<Handled> {
        let mut backoff = RECORD_BACKOFF;
        let mut tries = 1;
        loop {
            let recorded = self
                .dispatcher
                .complete_execution(task_id, result.attempt_id, result.report.clone())
                .await;
            match recorded {
                Ok(outcome) => return Ok(Handled::from(outcome)),
                Err(err) if is_transient(&err) && tries < RECORD_ATTEMPTS => {
                    warn!(%task_id, error = %err, tries, "recording result failed; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    tries += 1;
                }
                Err(err) => {
                    if is_transient(&err) {
                        self.dispatcher.hold_unrecorded(task_id, result).await;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Invokes the language model and turns the result into a report.
    async fn execute(&self, task: &Task) -> ExecutionReport {
        let started = Instant::now();
        let result = tokio::time::timeout(self.invoke_timeout, self.llm.invoke(task.prompt())).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut metadata = Map::new();
        metadata.insert("latency_ms".to_owned(), json!(latency_ms));
        metadata.insert(
            "worker_id".to_owned(),
            Value::String(self.worker_id.as_str().to_owned()),
        );

        match result {
            Ok(Ok(completion)) => ExecutionReport::new(AttemptOutcome::Completed {
                output: completion.output,
            })
            .with_model_name(completion.model)
            .with_token_usage(completion.usage)
            .with_metadata(metadata),
            Ok(Err(err)) => {
                warn!(task_id = %task.id(), error = %err, "language model invocation failed");
                ExecutionReport::new(AttemptOutcome::Failed {
                    error_message: err.to_string(),
                    error_kind: Some(err.kind().to_owned()),
                })
                .with_metadata(metadata)
            }
            Err(_) => {
                warn!(task_id = %task.id(), "language model invocation timed out");
                ExecutionReport::new(AttemptOutcome::Failed {
                    error_message: format!(
                        "language model invocation exceeded {} s",
                        self.invoke_timeout.as_secs()
                    ),
                    error_kind: Some("timeout".to_owned()),
                })
                .with_metadata(metadata)
            }
        }
    }
}

const fn is_transient(err: &ServiceError) -> bool {
    matches!(
        err,
        ServiceError::Repository(TaskRepositoryError::Persistence(_))
            | ServiceError::ConcurrentModification(_)
    )
}
