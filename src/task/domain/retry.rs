//! Retry budget decisions for failed tasks.

use super::{Task, TaskDomainError, TaskStatus};

/// Default number of retries granted to a task when the caller does not
/// request one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Decides whether failed tasks may be resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    default_max_retries: u32,
}

impl RetryPolicy {
    /// Creates a policy granting `default_max_retries` to new tasks.
    #[must_use]
    pub const fn new(default_max_retries: u32) -> Self {
        Self {
            default_max_retries,
        }
    }

    /// Returns the retry budget for a new task.
    #[must_use]
    pub fn max_retries_for(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_max_retries)
    }

    /// Checks that `task` has failed and still has retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::RetryNotAllowed`] when the task is not
    /// failed, or [`TaskDomainError::RetryBudgetExhausted`] when
    /// `retry_count` has reached `max_retries`.
    pub fn ensure_retryable(task: &Task) -> Result<(), TaskDomainError> {
        if task.status() != TaskStatus::Failed {
            return Err(TaskDomainError::RetryNotAllowed {
                task_id: task.id(),
                status: task.status(),
            });
        }
        if Self::remaining(task) == 0 {
            return Err(TaskDomainError::RetryBudgetExhausted {
                task_id: task.id(),
                retry_count: task.retry_count(),
                max_retries: task.max_retries(),
            });
        }
        Ok(())
    }

    /// Returns how many retries remain for `task`.
    #[must_use]
    pub const fn remaining(task: &Task) -> u32 {
        task.max_retries().saturating_sub(task.retry_count())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}
