//! Identifier and validated scalar types for the task domain.

use super::TaskDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a task name, matching the `VARCHAR(255)` column.
pub const MAX_TASK_NAME_CHARS: usize = 255;

/// Maximum length of the `created_by` attribution.
pub const MAX_CREATED_BY_CHARS: usize = 255;

/// Maximum length of a worker identifier, matching the `VARCHAR(100)` column.
pub const MAX_WORKER_ID_CHARS: usize = 100;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random ", $what, " identifier.")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a ", $what, " identifier from an existing UUID.")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the wrapped UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique, immutable identifier of a task.
    TaskId,
    "task"
);

uuid_identifier!(
    /// Unique identifier of one execution attempt.
    AttemptId,
    "attempt"
);

uuid_identifier!(
    /// Unique identifier of a lineage chain.
    ChainId,
    "chain"
);

uuid_identifier!(
    /// Unique identifier of a lineage edge row.
    EdgeId,
    "edge"
);

/// Validated human-readable task name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    /// Creates a validated task name.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyTaskName`] when the trimmed value is
    /// empty, or [`TaskDomainError::TaskNameTooLong`] when it exceeds
    /// [`MAX_TASK_NAME_CHARS`] characters.
    pub fn new(value: impl Into<String>) -> Result<Self, TaskDomainError> {
        let raw = value.into();
        let normalized = raw.trim();
        if normalized.is_empty() {
            return Err(TaskDomainError::EmptyTaskName);
        }
        let actual = normalized.chars().count();
        if actual > MAX_TASK_NAME_CHARS {
            return Err(TaskDomainError::TaskNameTooLong {
                max: MAX_TASK_NAME_CHARS,
                actual,
            });
        }
        Ok(Self(normalized.to_owned()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prompt text sent to the language model.
///
/// The prompt keeps its original whitespace; only emptiness is judged on the
/// trimmed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prompt(String);

impl Prompt {
    /// Prefix inserted ahead of a child prompt when the parent output is
    /// carried forward.
    pub const PARENT_OUTPUT_PREFIX: &'static str = "Previous task output: ";

    /// Creates a validated prompt bounded by `max_chars`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyPrompt`] for blank input and
    /// [`TaskDomainError::PromptTooLong`] when the limit is exceeded.
    pub fn new(value: impl Into<String>, max_chars: usize) -> Result<Self, TaskDomainError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(TaskDomainError::EmptyPrompt);
        }
        let actual = raw.chars().count();
        if actual > max_chars {
            return Err(TaskDomainError::PromptTooLong {
                max: max_chars,
                actual,
            });
        }
        Ok(Self(raw))
    }

    /// Reconstructs a prompt loaded from storage without re-validation.
    #[must_use]
    pub const fn from_persisted(value: String) -> Self {
        Self(value)
    }

    /// Returns a prompt prefixed with the output of a parent task, still
    /// bounded by `max_chars`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::PromptTooLong`] when the combined prompt
    /// exceeds the limit.
    pub fn with_parent_output(
        &self,
        parent_output: &str,
        max_chars: usize,
    ) -> Result<Self, TaskDomainError> {
        Self::new(
            format!("{}{parent_output}\n\n{}", Self::PARENT_OUTPUT_PREFIX, self.0),
            max_chars,
        )
    }

    /// Returns the prompt as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribution of the caller that submitted a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreatedBy(String);

impl CreatedBy {
    /// Creates a validated attribution.
    ///
    /// Blank values are treated as absent and yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::CreatedByTooLong`] when the value exceeds
    /// [`MAX_CREATED_BY_CHARS`] characters.
    pub fn new(value: impl Into<String>) -> Result<Option<Self>, TaskDomainError> {
        let raw = value.into();
        let normalized = raw.trim();
        if normalized.is_empty() {
            return Ok(None);
        }
        let actual = normalized.chars().count();
        if actual > MAX_CREATED_BY_CHARS {
            return Err(TaskDomainError::CreatedByTooLong {
                max: MAX_CREATED_BY_CHARS,
                actual,
            });
        }
        Ok(Some(Self(normalized.to_owned())))
    }

    /// Returns the attribution as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of the worker process that executed an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    /// Creates a validated worker identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidWorkerId`] when the value is blank
    /// or longer than [`MAX_WORKER_ID_CHARS`] characters.
    pub fn new(value: impl Into<String>) -> Result<Self, TaskDomainError> {
        let raw = value.into();
        let normalized = raw.trim();
        if normalized.is_empty() || normalized.chars().count() > MAX_WORKER_ID_CHARS {
            return Err(TaskDomainError::InvalidWorkerId(raw));
        }
        Ok(Self(normalized.to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-based execution attempt counter, unique per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptNumber(u32);

impl AttemptNumber {
    /// The first attempt of a task.
    pub const FIRST: Self = Self(1);

    /// Creates a validated attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidAttemptNumber`] for zero.
    pub const fn new(value: u32) -> Result<Self, TaskDomainError> {
        if value == 0 {
            return Err(TaskDomainError::InvalidAttemptNumber(value));
        }
        Ok(Self(value))
    }

    /// Returns the number following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the underlying numeric value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for AttemptNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
