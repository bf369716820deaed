//! Service-level error taxonomy and user-facing error reports.

use crate::task::{
    domain::{AttemptId, TaskDomainError, TaskId},
    ports::{TaskRepositoryError, WorkQueueError},
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Stable classification of service failures exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request was malformed.
    InvalidArgument,
    /// A referenced task or attempt does not exist.
    NotFound,
    /// The operation is illegal in the task's current state.
    FailedPrecondition,
    /// The work queue could not accept the task.
    Unavailable,
    /// Storage or another internal component failed.
    Internal,
}

impl ErrorCategory {
    /// Returns the canonical category name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }

    /// Returns the stable public message for the category.
    #[must_use]
    pub const fn public_message(self) -> &'static str {
        match self {
            Self::InvalidArgument => "The request contains invalid input.",
            Self::NotFound => "The requested resource was not found.",
            Self::FailedPrecondition => {
                "The operation is not allowed in the task's current state."
            }
            Self::Unavailable => "The task was saved but could not be queued; retry later.",
            Self::Internal => "An internal error occurred.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible error payload: a stable message plus a correlation id that
/// also appears in the log line describing the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Failure category.
    pub category: ErrorCategory,
    /// Stable category message.
    pub message: &'static str,
    /// Identifier joining the report to the detailed log entry.
    pub correlation_id: Uuid,
}

/// Errors returned by task services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Domain validation or a lifecycle rule failed.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),

    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] TaskRepositoryError),

    /// The task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The requested parent task does not exist.
    #[error("parent task not found: {0}")]
    ParentNotFound(TaskId),

    /// The execution attempt does not exist.
    #[error("execution attempt not found: {0}")]
    AttemptNotFound(AttemptId),

    /// The attempt belongs to a different task.
    #[error("execution attempt {attempt_id} does not belong to task {task_id}")]
    AttemptTaskMismatch {
        /// Task named by the caller.
        task_id: TaskId,
        /// Attempt named by the caller.
        attempt_id: AttemptId,
    },

    /// Concurrent writers kept changing the task.
    #[error("task {0} was modified concurrently; retry the operation")]
    ConcurrentModification(TaskId),

    /// The work queue did not accept one or more tasks; they remain stored.
    #[error("work queue unavailable for {count} task(s): {source}", count = .task_ids.len())]
    Unavailable {
        /// Tasks left waiting for a successful enqueue.
        task_ids: Vec<TaskId>,
        /// Queue failure.
        #[source]
        source: WorkQueueError,
    },
}

impl ServiceError {
    /// Maps the error onto the public taxonomy.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Domain(err) => domain_category(err),
            Self::Repository(err) => repository_category(err),
            Self::TaskNotFound(_) | Self::ParentNotFound(_) | Self::AttemptNotFound(_) => {
                ErrorCategory::NotFound
            }
            Self::AttemptTaskMismatch { .. } => ErrorCategory::InvalidArgument,
            Self::ConcurrentModification(_) => ErrorCategory::FailedPrecondition,
            Self::Unavailable { .. } => ErrorCategory::Unavailable,
        }
    }

    /// Builds the caller-facing report and logs the detailed error under the
    /// same correlation id.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        let category = self.category();
        let correlation_id = Uuid::new_v4();
        match category {
            ErrorCategory::Internal | ErrorCategory::Unavailable => error!(
                %correlation_id,
                category = category.as_str(),
                error = %self,
                "task operation failed"
            ),
            _ => warn!(
                %correlation_id,
                category = category.as_str(),
                error = %self,
                "task operation rejected"
            ),
        }
        ErrorReport {
            category,
            message: category.public_message(),
            correlation_id,
        }
    }
}

const fn domain_category(err: &TaskDomainError) -> ErrorCategory {
    if err.is_precondition_failure() {
        return ErrorCategory::FailedPrecondition;
    }
    match err {
        TaskDomainError::UnknownTemplate(_) => ErrorCategory::NotFound,
        TaskDomainError::TemplateRender { .. } => ErrorCategory::Internal,
        _ => ErrorCategory::InvalidArgument,
    }
}

const fn repository_category(err: &TaskRepositoryError) -> ErrorCategory {
    match err {
        TaskRepositoryError::NotFound(_)
        | TaskRepositoryError::ParentNotFound(_)
        | TaskRepositoryError::AttemptNotFound(_) => ErrorCategory::NotFound,
        TaskRepositoryError::DuplicateAttempt { .. }
        | TaskRepositoryError::AttemptAlreadyRecorded(_) => ErrorCategory::FailedPrecondition,
        TaskRepositoryError::DuplicateTask(_) | TaskRepositoryError::Persistence(_) => {
            ErrorCategory::Internal
        }
    }
}

/// Result type for task service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
