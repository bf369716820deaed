//! Task aggregate root and the lifecycle state machine.

use super::{
    CreatedBy, OutputMapping, ParsePriorityError, ParseTaskStatusError, Prompt, RetryPolicy,
    TaskDomainError, TaskId, TaskName,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been stored but the work queue has not confirmed it.
    Pending,
    /// Task is on the work queue awaiting a worker.
    Queued,
    /// A worker has claimed the task.
    Running,
    /// The last attempt produced output.
    Completed,
    /// The last attempt failed.
    Failed,
    /// The task was cancelled by a caller.
    Cancelled,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns `true` for `completed`, `failed`, and `cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether the lifecycle permits moving directly to `target`.
    ///
    /// `failed → queued` is deliberately absent: it is only reachable
    /// through [`Task::retry`], which also updates retry bookkeeping.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Queued)
                | (Self::Queued, Self::Running)
                | (Self::Running, Self::Completed | Self::Failed)
                | (Self::Pending | Self::Queued | Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}

/// Execution priority. Variants are ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Ahead of normal work.
    High,
    /// Ahead of everything else.
    Critical,
}

impl Priority {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Priority {
    type Error = ParsePriorityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParsePriorityError(value.to_owned())),
        }
    }
}

/// Whether a worker may claim a task at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claimability {
    /// The task may be claimed now.
    Claimable,
    /// The task is waiting for its deferred start time.
    Deferred(DateTime<Utc>),
    /// The task is already running or finished.
    Settled(TaskStatus),
}

/// Validated submission data for a new task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    name: TaskName,
    prompt: Prompt,
    priority: Priority,
    execute_after: Option<DateTime<Utc>>,
    max_retries: u32,
    created_by: Option<CreatedBy>,
    metadata: Map<String, Value>,
}

impl TaskDraft {
    /// Creates a draft with default priority and no deferral.
    #[must_use]
    pub fn new(name: TaskName, prompt: Prompt, max_retries: u32) -> Self {
        Self {
            name,
            prompt,
            priority: Priority::default(),
            execute_after: None,
            max_retries,
            created_by: None,
            metadata: Map::new(),
        }
    }

    /// Sets the execution priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the deferred start time.
    #[must_use]
    pub const fn with_execute_after(mut self, execute_after: Option<DateTime<Utc>>) -> Self {
        self.execute_after = execute_after;
        self
    }

    /// Sets the submitter attribution.
    #[must_use]
    pub fn with_created_by(mut self, created_by: Option<CreatedBy>) -> Self {
        self.created_by = created_by;
        self
    }

    /// Sets the free-form metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the task name.
    #[must_use]
    pub const fn name(&self) -> &TaskName {
        &self.name
    }
}

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    name: TaskName,
    prompt: Prompt,
    status: TaskStatus,
    priority: Priority,
    scheduled_at: DateTime<Utc>,
    execute_after: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    output: Option<String>,
    error_message: Option<String>,
    retry_count: u32,
    max_retries: u32,
    parent_task_id: Option<TaskId>,
    chain_position: Option<u32>,
    created_by: Option<CreatedBy>,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted name.
    pub name: TaskName,
    /// Persisted prompt.
    pub prompt: Prompt,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted priority.
    pub priority: Priority,
    /// Persisted scheduling timestamp.
    pub scheduled_at: DateTime<Utc>,
    /// Persisted deferred start.
    pub execute_after: Option<DateTime<Utc>>,
    /// Persisted start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Persisted completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Persisted output.
    pub output: Option<String>,
    /// Persisted error message.
    pub error_message: Option<String>,
    /// Persisted retry counter.
    pub retry_count: u32,
    /// Persisted retry budget.
    pub max_retries: u32,
    /// Persisted denormalized parent pointer.
    pub parent_task_id: Option<TaskId>,
    /// Persisted chain position.
    pub chain_position: Option<u32>,
    /// Persisted submitter attribution.
    pub created_by: Option<CreatedBy>,
    /// Persisted metadata.
    pub metadata: Map<String, Value>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest lifecycle timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new root task in the `pending` status.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::ExecuteAfterInPast`] when the deferred
    /// start precedes the current clock reading.
    pub fn new(draft: TaskDraft, clock: &impl Clock) -> Result<Self, TaskDomainError> {
        let now = clock.utc();
        if let Some(execute_after) = draft.execute_after
            && execute_after < now
        {
            return Err(TaskDomainError::ExecuteAfterInPast { execute_after, now });
        }

        Ok(Self {
            id: TaskId::new(),
            name: draft.name,
            prompt: draft.prompt,
            status: TaskStatus::Pending,
            priority: draft.priority,
            scheduled_at: now,
            execute_after: draft.execute_after,
            started_at: None,
            completed_at: None,
            output: None,
            error_message: None,
            retry_count: 0,
            max_retries: draft.max_retries,
            parent_task_id: None,
            chain_position: None,
            created_by: draft.created_by,
            metadata: draft.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    /// Creates a new `pending` task chained under `parent`.
    ///
    /// The child receives the parent pointer and the next chain position;
    /// `mapping` decides whether the parent output is carried into the
    /// child prompt, which must still fit in `max_prompt_chars`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::ExecuteAfterInPast`] as for [`Task::new`],
    /// or [`TaskDomainError::PromptTooLong`] when the mapped prompt is over
    /// the limit.
    pub fn new_child(
        draft: TaskDraft,
        parent: &Self,
        mapping: &OutputMapping,
        max_prompt_chars: usize,
        clock: &impl Clock,
    ) -> Result<Self, TaskDomainError> {
        let mut task = Self::new(draft, clock)?;
        if let Some(parent_output) = parent.output() {
            task.prompt = mapping.apply(&task.prompt, parent_output, max_prompt_chars)?;
        }
        task.parent_task_id = Some(parent.id);
        task.chain_position = Some(parent.chain_position.unwrap_or(0).saturating_add(1));
        Ok(task)
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            name: data.name,
            prompt: data.prompt,
            status: data.status,
            priority: data.priority,
            scheduled_at: data.scheduled_at,
            execute_after: data.execute_after,
            started_at: data.started_at,
            completed_at: data.completed_at,
            output: data.output,
            error_message: data.error_message,
            retry_count: data.retry_count,
            max_retries: data.max_retries,
            parent_task_id: data.parent_task_id,
            chain_position: data.chain_position,
            created_by: data.created_by,
            metadata: data.metadata,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task name.
    #[must_use]
    pub const fn name(&self) -> &TaskName {
        &self.name
    }

    /// Returns the prompt sent to the language model.
    #[must_use]
    pub const fn prompt(&self) -> &Prompt {
        &self.prompt
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the execution priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the scheduling timestamp.
    #[must_use]
    pub const fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    /// Returns the deferred start time, if any.
    #[must_use]
    pub const fn execute_after(&self) -> Option<DateTime<Utc>> {
        self.execute_after
    }

    /// Returns when the current attempt started, if it has.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the task reached a terminal status, if it has.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the successful output, if any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Returns the failure message, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns how many retries have been consumed.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the retry budget.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the denormalized parent pointer.
    #[must_use]
    pub const fn parent_task_id(&self) -> Option<TaskId> {
        self.parent_task_id
    }

    /// Returns the position within the lineage chain; roots have none.
    #[must_use]
    pub const fn chain_position(&self) -> Option<u32> {
        self.chain_position
    }

    /// Returns the submitter attribution.
    #[must_use]
    pub const fn created_by(&self) -> Option<&CreatedBy> {
        self.created_by.as_ref()
    }

    /// Returns the free-form metadata map.
    #[must_use]
    pub const fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest lifecycle timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Reports whether a worker may claim the task at `now`.
    ///
    /// Pending tasks are claimable so that a worker receiving a delivery
    /// before the dispatcher records the enqueue confirmation does not drop
    /// it; the claim walks `pending → queued → running`.
    #[must_use]
    pub fn claimability(&self, now: DateTime<Utc>) -> Claimability {
        match self.status {
            TaskStatus::Pending | TaskStatus::Queued => match self.execute_after {
                Some(until) if until > now => Claimability::Deferred(until),
                _ => Claimability::Claimable,
            },
            status => Claimability::Settled(status),
        }
    }

    /// Applies a single state-machine transition.
    ///
    /// Entering `running` stamps `started_at`; entering a terminal status
    /// stamps `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] when the
    /// lifecycle does not permit the move.
    pub fn transition_to(
        &mut self,
        target: TaskStatus,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskDomainError::InvalidStateTransition {
                task_id: self.id,
                from: self.status,
                to: target,
            });
        }
        let now = clock.utc();
        if target == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if target.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }

    /// Moves a claimable task to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] when the task is
    /// neither pending nor queued.
    pub fn start(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        if self.status == TaskStatus::Pending {
            self.transition_to(TaskStatus::Queued, clock)?;
        }
        self.transition_to(TaskStatus::Running, clock)
    }

    /// Records a successful outcome.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task
    /// is running.
    pub fn complete(
        &mut self,
        output: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        self.transition_to(TaskStatus::Completed, clock)?;
        self.output = Some(output.into());
        self.error_message = None;
        Ok(())
    }

    /// Records a failed outcome.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] unless the task
    /// is running.
    pub fn fail(
        &mut self,
        error_message: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        self.transition_to(TaskStatus::Failed, clock)?;
        self.error_message = Some(error_message.into());
        self.output = None;
        Ok(())
    }

    /// Cancels a pending, queued, or running task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] for terminal
    /// tasks.
    pub fn cancel(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        self.transition_to(TaskStatus::Cancelled, clock)
    }

    /// Resubmits a failed task as a new logical attempt.
    ///
    /// Increments `retry_count`, clears the terminal fields, and moves the
    /// task back to `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::RetryNotAllowed`] or
    /// [`TaskDomainError::RetryBudgetExhausted`] as decided by
    /// [`RetryPolicy::ensure_retryable`].
    pub fn retry(&mut self, clock: &impl Clock) -> Result<(), TaskDomainError> {
        RetryPolicy::ensure_retryable(self)?;
        self.retry_count += 1;
        self.status = TaskStatus::Queued;
        self.started_at = None;
        self.completed_at = None;
        self.output = None;
        self.error_message = None;
        self.updated_at = clock.utc();
        Ok(())
    }

    /// Checks that the task may be handed to the work queue again.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::RequeueNotAllowed`] unless the task is
    /// pending or queued.
    pub fn ensure_requeueable(&self) -> Result<(), TaskDomainError> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Queued => Ok(()),
            status => Err(TaskDomainError::RequeueNotAllowed {
                task_id: self.id,
                status,
            }),
        }
    }
}
