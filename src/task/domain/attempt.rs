//! Execution attempt ledger entries.

use super::{AttemptId, AttemptNumber, TaskDomainError, TaskId, TaskStatus, WorkerId};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token counts reported by the language model.
///
/// Usage is all-or-nothing: either every count is known or the whole value
/// is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced in the completion.
    pub completion_tokens: u32,
    /// Total tokens billed.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Builds usage from partially known counts, returning `None` unless all
    /// three are present.
    #[must_use]
    pub const fn from_optional(
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        total_tokens: Option<u32>,
    ) -> Option<Self> {
        match (prompt_tokens, completion_tokens, total_tokens) {
            (Some(prompt), Some(completion), Some(total)) => {
                Some(Self::new(prompt, completion, total))
            }
            _ => None,
        }
    }
}

/// Terminal result reported by a worker for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The model produced output.
    Completed {
        /// Model output.
        output: String,
    },
    /// The attempt failed.
    Failed {
        /// Human-readable failure message.
        error_message: String,
        /// Machine-readable failure class, if known.
        error_kind: Option<String>,
    },
}

impl AttemptOutcome {
    /// Builds an outcome from a reported status and its payload.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::NonTerminalOutcome`] unless `status` is
    /// `completed` or `failed`.
    pub fn from_parts(
        status: TaskStatus,
        output: Option<String>,
        error_message: Option<String>,
        error_kind: Option<String>,
    ) -> Result<Self, TaskDomainError> {
        match status {
            TaskStatus::Completed => Ok(Self::Completed {
                output: output.unwrap_or_default(),
            }),
            TaskStatus::Failed => Ok(Self::Failed {
                error_message: error_message.unwrap_or_else(|| "execution failed".to_owned()),
                error_kind,
            }),
            other => Err(TaskDomainError::NonTerminalOutcome(other)),
        }
    }

    /// Returns the task status this outcome leads to.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        match self {
            Self::Completed { .. } => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// Outcome plus the metrics a worker gathered while executing.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Terminal outcome.
    pub outcome: AttemptOutcome,
    /// Model identifier that served the request.
    pub model_name: Option<String>,
    /// Token counts, when the provider reported all of them.
    pub token_usage: Option<TokenUsage>,
    /// Free-form execution metadata.
    pub metadata: Map<String, Value>,
}

impl ExecutionReport {
    /// Creates a report without metrics.
    #[must_use]
    pub fn new(outcome: AttemptOutcome) -> Self {
        Self {
            outcome,
            model_name: None,
            token_usage: None,
            metadata: Map::new(),
        }
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn with_model_name(mut self, model_name: Option<String>) -> Self {
        self.model_name = model_name;
        self
    }

    /// Sets the token usage.
    #[must_use]
    pub const fn with_token_usage(mut self, token_usage: Option<TokenUsage>) -> Self {
        self.token_usage = token_usage;
        self
    }

    /// Sets the execution metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One execution try of a task.
///
/// Attempts are append-only: once `completed_at` is set the row never
/// changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    id: AttemptId,
    task_id: TaskId,
    attempt_number: AttemptNumber,
    status: TaskStatus,
    queued_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
    model_name: Option<String>,
    token_usage: Option<TokenUsage>,
    output: Option<String>,
    error_message: Option<String>,
    error_kind: Option<String>,
    worker_id: Option<WorkerId>,
    metadata: Map<String, Value>,
}

/// Parameter object for reconstructing a persisted attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedAttemptData {
    /// Persisted attempt identifier.
    pub id: AttemptId,
    /// Owning task.
    pub task_id: TaskId,
    /// Persisted attempt number.
    pub attempt_number: AttemptNumber,
    /// Status snapshot.
    pub status: TaskStatus,
    /// When the task was queued before this attempt.
    pub queued_at: Option<DateTime<Utc>>,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Model identifier.
    pub model_name: Option<String>,
    /// Token counts.
    pub token_usage: Option<TokenUsage>,
    /// Output.
    pub output: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
    /// Error class.
    pub error_kind: Option<String>,
    /// Worker that ran the attempt.
    pub worker_id: Option<WorkerId>,
    /// Execution metadata.
    pub metadata: Map<String, Value>,
}

impl ExecutionAttempt {
    /// Opens a new running attempt.
    #[must_use]
    pub fn begin(
        task_id: TaskId,
        attempt_number: AttemptNumber,
        worker_id: WorkerId,
        queued_at: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            task_id,
            attempt_number,
            status: TaskStatus::Running,
            queued_at,
            started_at,
            completed_at: None,
            duration_ms: None,
            model_name: None,
            token_usage: None,
            output: None,
            error_message: None,
            error_kind: None,
            worker_id: Some(worker_id),
            metadata: Map::new(),
        }
    }

    /// Reconstructs an attempt from persisted storage.
    ///
    /// The duration is recomputed from the timestamps rather than trusted.
    #[must_use]
    pub fn from_persisted(data: PersistedAttemptData) -> Self {
        Self {
            id: data.id,
            task_id: data.task_id,
            attempt_number: data.attempt_number,
            status: data.status,
            queued_at: data.queued_at,
            started_at: data.started_at,
            completed_at: data.completed_at,
            duration_ms: data
                .completed_at
                .map(|completed_at| duration_between(data.started_at, completed_at)),
            model_name: data.model_name,
            token_usage: data.token_usage,
            output: data.output,
            error_message: data.error_message,
            error_kind: data.error_kind,
            worker_id: data.worker_id,
            metadata: data.metadata,
        }
    }

    /// Closes the attempt with the worker's report.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::AttemptAlreadyCompleted`] when the attempt
    /// already has a completion timestamp.
    pub fn finish(
        &mut self,
        report: ExecutionReport,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        if self.completed_at.is_some() {
            return Err(TaskDomainError::AttemptAlreadyCompleted(self.id));
        }
        let completed_at = clock.utc().max(self.started_at);
        self.status = report.outcome.status();
        match report.outcome {
            AttemptOutcome::Completed { output } => self.output = Some(output),
            AttemptOutcome::Failed {
                error_message,
                error_kind,
            } => {
                self.error_message = Some(error_message);
                self.error_kind = error_kind;
            }
        }
        self.model_name = report.model_name;
        self.token_usage = report.token_usage;
        self.metadata = report.metadata;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some(duration_between(self.started_at, completed_at));
        Ok(())
    }

    /// Returns the attempt identifier.
    #[must_use]
    pub const fn id(&self) -> AttemptId {
        self.id
    }

    /// Returns the owning task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the one-based attempt number.
    #[must_use]
    pub const fn attempt_number(&self) -> AttemptNumber {
        self.attempt_number
    }

    /// Returns the status snapshot.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns when the task was last queued before this attempt.
    #[must_use]
    pub const fn queued_at(&self) -> Option<DateTime<Utc>> {
        self.queued_at
    }

    /// Returns when the attempt started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the attempt finished.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns whether the attempt has recorded its outcome.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns the derived duration in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Returns the model identifier.
    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    /// Returns the token counts.
    #[must_use]
    pub const fn token_usage(&self) -> Option<TokenUsage> {
        self.token_usage
    }

    /// Returns the output.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Returns the error message.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the error class.
    #[must_use]
    pub fn error_kind(&self) -> Option<&str> {
        self.error_kind.as_deref()
    }

    /// Returns the worker that ran the attempt.
    #[must_use]
    pub const fn worker_id(&self) -> Option<&WorkerId> {
        self.worker_id.as_ref()
    }

    /// Returns the execution metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

fn duration_between(started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> u64 {
    u64::try_from((completed_at - started_at).num_milliseconds()).unwrap_or(0)
}
