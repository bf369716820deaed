//! Diesel row models for task persistence.

use super::schema::{task_chain_edges, task_chains, task_executions, tasks};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Internal task identifier.
    pub id: uuid::Uuid,
    /// Human-readable name.
    pub name: String,
    /// Prompt text.
    pub prompt: String,
    /// Lifecycle status.
    pub status: String,
    /// Execution priority.
    pub priority: String,
    /// Scheduling timestamp.
    pub scheduled_at: DateTime<Utc>,
    /// Deferred start.
    pub execute_after: Option<DateTime<Utc>>,
    /// Attempt start.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Output.
    pub output: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
    /// Retries consumed.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// Denormalized lineage parent.
    pub parent_task_id: Option<uuid::Uuid>,
    /// Chain position.
    pub chain_position: Option<i32>,
    /// Submitter attribution.
    pub created_by: Option<String>,
    /// Metadata.
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert and full-row update model for task records.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct TaskRecordRow {
    /// Internal task identifier.
    pub id: uuid::Uuid,
    /// Human-readable name.
    pub name: String,
    /// Prompt text.
    pub prompt: String,
    /// Lifecycle status.
    pub status: String,
    /// Execution priority.
    pub priority: String,
    /// Scheduling timestamp.
    pub scheduled_at: DateTime<Utc>,
    /// Deferred start.
    pub execute_after: Option<DateTime<Utc>>,
    /// Attempt start.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Output.
    pub output: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
    /// Retries consumed.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// Denormalized lineage parent.
    pub parent_task_id: Option<uuid::Uuid>,
    /// Chain position.
    pub chain_position: Option<i32>,
    /// Submitter attribution.
    pub created_by: Option<String>,
    /// Metadata.
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query result row for execution attempts.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = task_executions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AttemptRow {
    /// Attempt identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Attempt number.
    pub attempt_number: i32,
    /// Status snapshot.
    pub status: String,
    /// Queue timestamp.
    pub queued_at: Option<DateTime<Utc>>,
    /// Attempt start.
    pub started_at: DateTime<Utc>,
    /// Attempt end.
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived duration.
    pub duration_ms: Option<i64>,
    /// Serving model.
    pub model_name: Option<String>,
    /// Prompt tokens.
    pub prompt_tokens: Option<i32>,
    /// Completion tokens.
    pub completion_tokens: Option<i32>,
    /// Total tokens.
    pub total_tokens: Option<i32>,
    /// Output.
    pub output: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
    /// Error class.
    pub error_kind: Option<String>,
    /// Worker identifier.
    pub worker_id: Option<String>,
    /// Execution metadata.
    pub execution_metadata: Value,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert and full-row update model for execution attempts.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = task_executions)]
#[diesel(treat_none_as_null = true)]
pub struct AttemptRecordRow {
    /// Attempt identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Attempt number.
    pub attempt_number: i32,
    /// Status snapshot.
    pub status: String,
    /// Queue timestamp.
    pub queued_at: Option<DateTime<Utc>>,
    /// Attempt start.
    pub started_at: DateTime<Utc>,
    /// Attempt end.
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived duration.
    pub duration_ms: Option<i64>,
    /// Serving model.
    pub model_name: Option<String>,
    /// Prompt tokens.
    pub prompt_tokens: Option<i32>,
    /// Completion tokens.
    pub completion_tokens: Option<i32>,
    /// Total tokens.
    pub total_tokens: Option<i32>,
    /// Output.
    pub output: Option<String>,
    /// Error message.
    pub error_message: Option<String>,
    /// Error class.
    pub error_kind: Option<String>,
    /// Worker identifier.
    pub worker_id: Option<String>,
    /// Execution metadata.
    pub execution_metadata: Value,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Query and insert row for lineage chains.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_chains)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChainRow {
    /// Chain identifier.
    pub id: uuid::Uuid,
    /// Display name.
    pub chain_name: Option<String>,
    /// Root task.
    pub root_task_id: uuid::Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query and insert row for lineage edges.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_chain_edges)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EdgeRow {
    /// Edge identifier.
    pub id: uuid::Uuid,
    /// Owning chain.
    pub chain_id: uuid::Uuid,
    /// Parent task.
    pub parent_task_id: uuid::Uuid,
    /// Child task.
    pub child_task_id: uuid::Uuid,
    /// Output mapping.
    pub output_mapping: Option<Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
