//! Submission limits and listing queries.

use super::{TaskDomainError, TaskStatus};

/// Default prompt size limit in characters.
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 32_000;

/// Default number of tasks accepted by one batch submission.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Largest page a listing may request.
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Page size used when the caller does not supply one.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Configurable bounds applied at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLimits {
    /// Maximum prompt length in characters.
    pub max_prompt_chars: usize,
    /// Maximum tasks per batch.
    pub max_batch_size: usize,
}

impl TaskLimits {
    /// Checks a batch size against the configured bounds.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyBatch`] for an empty batch, or
    /// [`TaskDomainError::BatchTooLarge`] above `max_batch_size`.
    pub const fn check_batch_size(&self, actual: usize) -> Result<(), TaskDomainError> {
        if actual == 0 {
            return Err(TaskDomainError::EmptyBatch);
        }
        if actual > self.max_batch_size {
            return Err(TaskDomainError::BatchTooLarge {
                max: self.max_batch_size,
                actual,
            });
        }
        Ok(())
    }
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Filter and paging parameters for task listings.
///
/// Results are ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListQuery {
    limit: u32,
    offset: u64,
    status: Option<TaskStatus>,
    search: Option<String>,
}

impl TaskListQuery {
    /// Creates a query for one page.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidPageLimit`] when `limit` is outside
    /// `1..=MAX_PAGE_LIMIT`.
    pub const fn new(limit: u32, offset: u64) -> Result<Self, TaskDomainError> {
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(TaskDomainError::InvalidPageLimit {
                requested: limit,
                max: MAX_PAGE_LIMIT,
            });
        }
        Ok(Self {
            limit,
            offset,
            status: None,
            search: None,
        })
    }

    /// Restricts results to one status.
    #[must_use]
    pub const fn with_status(mut self, status: Option<TaskStatus>) -> Self {
        self.status = status;
        self
    }

    /// Restricts results to tasks whose name or prompt contains `search`,
    /// ignoring case. Blank searches are dropped.
    #[must_use]
    pub fn with_search(mut self, search: Option<&str>) -> Self {
        self.search = search
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        self
    }

    /// Returns the page size.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns the number of rows skipped.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the status filter.
    #[must_use]
    pub const fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// Returns the search text.
    #[must_use]
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }
}

impl Default for TaskListQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            status: None,
            search: None,
        }
    }
}
