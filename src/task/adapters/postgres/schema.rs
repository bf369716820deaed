//! Diesel schema for task lifecycle persistence.

diesel::table! {
    /// Task records.
    tasks (id) {
        /// Internal task identifier.
        id -> Uuid,
        /// Human-readable name.
        #[max_length = 255]
        name -> Varchar,
        /// Prompt sent to the language model.
        prompt -> Text,
        /// Task lifecycle status.
        #[max_length = 20]
        status -> Varchar,
        /// Execution priority.
        #[max_length = 20]
        priority -> Varchar,
        /// Scheduling timestamp.
        scheduled_at -> Timestamptz,
        /// Deferred start.
        execute_after -> Nullable<Timestamptz>,
        /// Start of the current attempt.
        started_at -> Nullable<Timestamptz>,
        /// Terminal timestamp.
        completed_at -> Nullable<Timestamptz>,
        /// Successful output.
        output -> Nullable<Text>,
        /// Failure message.
        error_message -> Nullable<Text>,
        /// Retries consumed.
        retry_count -> Int4,
        /// Retry budget.
        max_retries -> Int4,
        /// Denormalized lineage parent.
        parent_task_id -> Nullable<Uuid>,
        /// Position within the lineage chain.
        chain_position -> Nullable<Int4>,
        /// Submitter attribution.
        #[max_length = 255]
        created_by -> Nullable<Varchar>,
        /// Free-form metadata.
        metadata -> Jsonb,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Execution attempt ledger.
    task_executions (id) {
        /// Attempt identifier.
        id -> Uuid,
        /// Owning task.
        task_id -> Uuid,
        /// One-based attempt number, unique per task.
        attempt_number -> Int4,
        /// Status snapshot.
        #[max_length = 20]
        status -> Varchar,
        /// When the task was queued before this attempt.
        queued_at -> Nullable<Timestamptz>,
        /// Attempt start.
        started_at -> Timestamptz,
        /// Attempt end.
        completed_at -> Nullable<Timestamptz>,
        /// Derived duration in milliseconds.
        duration_ms -> Nullable<Int8>,
        /// Serving model.
        #[max_length = 100]
        model_name -> Nullable<Varchar>,
        /// Prompt tokens.
        prompt_tokens -> Nullable<Int4>,
        /// Completion tokens.
        completion_tokens -> Nullable<Int4>,
        /// Total tokens.
        total_tokens -> Nullable<Int4>,
        /// Output.
        output -> Nullable<Text>,
        /// Error message.
        error_message -> Nullable<Text>,
        /// Error class.
        #[max_length = 100]
        error_kind -> Nullable<Varchar>,
        /// Worker identifier.
        #[max_length = 100]
        worker_id -> Nullable<Varchar>,
        /// Execution metadata.
        execution_metadata -> Jsonb,
        /// Row creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Lineage chains, one per root task.
    task_chains (id) {
        /// Chain identifier.
        id -> Uuid,
        /// Display name.
        #[max_length = 255]
        chain_name -> Nullable<Varchar>,
        /// Root task, unique.
        root_task_id -> Uuid,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Canonical parent-child lineage edges.
    task_chain_edges (id) {
        /// Edge identifier.
        id -> Uuid,
        /// Owning chain.
        chain_id -> Uuid,
        /// Parent task.
        parent_task_id -> Uuid,
        /// Child task.
        child_task_id -> Uuid,
        /// How the child consumes the parent output.
        output_mapping -> Nullable<Jsonb>,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::joinable!(task_executions -> tasks (task_id));
diesel::joinable!(task_chain_edges -> task_chains (chain_id));

diesel::allow_tables_to_appear_in_same_query!(tasks, task_executions, task_chains, task_chain_edges);
