//! Error types for task domain validation, parsing, and state transitions.

use super::{AttemptId, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned while constructing or mutating domain task values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The task name is empty after trimming.
    #[error("task name must not be empty")]
    EmptyTaskName,

    /// The task name exceeds the persisted column width.
    #[error("task name has {actual} characters, exceeds limit of {max}")]
    TaskNameTooLong {
        /// Maximum permitted characters.
        max: usize,
        /// Supplied characters.
        actual: usize,
    },

    /// The prompt is empty after trimming.
    #[error("prompt must not be empty")]
    EmptyPrompt,

    /// The prompt exceeds the configured limit.
    #[error("prompt has {actual} characters, exceeds limit of {max}")]
    PromptTooLong {
        /// Maximum permitted characters.
        max: usize,
        /// Supplied characters.
        actual: usize,
    },

    /// The submitter attribution exceeds the persisted column width.
    #[error("created_by has {actual} characters, exceeds limit of {max}")]
    CreatedByTooLong {
        /// Maximum permitted characters.
        max: usize,
        /// Supplied characters.
        actual: usize,
    },

    /// The worker identifier is blank or too long.
    #[error("invalid worker identifier '{0}'")]
    InvalidWorkerId(String),

    /// A deferred start time lies in the past.
    #[error("execute_after {execute_after} is earlier than the current time {now}")]
    ExecuteAfterInPast {
        /// Requested deferred start.
        execute_after: DateTime<Utc>,
        /// Clock reading at submission.
        now: DateTime<Utc>,
    },

    /// The attempt number is not a positive integer.
    #[error("invalid attempt number {0}, expected a positive integer")]
    InvalidAttemptNumber(u32),

    /// The requested state transition is not permitted.
    #[error("task {task_id} cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Task identifier.
        task_id: TaskId,
        /// Current state.
        from: TaskStatus,
        /// Requested target state.
        to: TaskStatus,
    },

    /// Retry was requested for a task that has not failed.
    #[error("task {task_id} is {status}; only failed tasks can be retried")]
    RetryNotAllowed {
        /// Task identifier.
        task_id: TaskId,
        /// Current state.
        status: TaskStatus,
    },

    /// Retry was requested for a task whose retry budget is spent.
    #[error("task {task_id} has used {retry_count} of {max_retries} retries")]
    RetryBudgetExhausted {
        /// Task identifier.
        task_id: TaskId,
        /// Retries already used.
        retry_count: u32,
        /// Configured retry budget.
        max_retries: u32,
    },

    /// Re-enqueue was requested for a task that is neither pending nor queued.
    #[error("task {task_id} is {status}; only pending or queued tasks can be re-enqueued")]
    RequeueNotAllowed {
        /// Task identifier.
        task_id: TaskId,
        /// Current state.
        status: TaskStatus,
    },

    /// The attempt already recorded a terminal outcome.
    #[error("execution attempt {0} is already completed")]
    AttemptAlreadyCompleted(AttemptId),

    /// A worker reported a non-terminal outcome.
    #[error("execution outcome must be completed or failed, got {0}")]
    NonTerminalOutcome(TaskStatus),

    /// A lineage edge would link a task to itself.
    #[error("task {0} cannot be its own parent")]
    SelfReference(TaskId),

    /// No template has the requested identifier.
    #[error("unknown task template '{0}'")]
    UnknownTemplate(String),

    /// The template input text is blank.
    #[error("template input must not be empty")]
    EmptyTemplateInput,

    /// The template failed to render.
    #[error("template '{template_id}' failed to render: {reason}")]
    TemplateRender {
        /// Template identifier.
        template_id: String,
        /// Renderer diagnostic.
        reason: String,
    },

    /// The requested lineage depth is outside the supported range.
    #[error("lineage depth {requested} is outside 1..={max}")]
    InvalidLineageDepth {
        /// Requested depth.
        requested: u32,
        /// Maximum supported depth.
        max: u32,
    },

    /// The requested page size is outside the supported range.
    #[error("page limit {requested} is outside 1..={max}")]
    InvalidPageLimit {
        /// Requested limit.
        requested: u32,
        /// Maximum supported limit.
        max: u32,
    },

    /// A batch contained no tasks.
    #[error("batch must contain at least one task")]
    EmptyBatch,

    /// A batch exceeded the configured size.
    #[error("batch has {actual} tasks, exceeds limit of {max}")]
    BatchTooLarge {
        /// Maximum permitted tasks.
        max: usize,
        /// Supplied tasks.
        actual: usize,
    },
}

impl TaskDomainError {
    /// Returns `true` when the error reports an illegal operation for the
    /// current task state rather than malformed input.
    #[must_use]
    pub const fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidStateTransition { .. }
                | Self::RetryNotAllowed { .. }
                | Self::RetryBudgetExhausted { .. }
                | Self::RequeueNotAllowed { .. }
                | Self::AttemptAlreadyCompleted(_)
        )
    }
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing execution priorities from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown execution priority: {0}")]
pub struct ParsePriorityError(pub String);
