//! Task submission: single, batch, and template-based creation.

use super::Dispatcher;
use crate::task::{
    domain::{
        CreatedBy, NewTaskRecord, OutputMapping, Priority, Prompt, Task, TaskDomainError, TaskId,
        TaskDraft, TaskName, TaskTemplate,
    },
    ports::{TaskRepository, TaskRepositoryError, WorkQueue},
    services::{ServiceError, ServiceResult},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{info, instrument};

/// Request to create one task.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTaskRequest {
    /// Display name.
    pub name: String,
    /// Prompt sent to the language model.
    pub prompt: String,
    /// Execution priority.
    pub priority: Priority,
    /// Parent task in the lineage graph.
    pub parent_task_id: Option<TaskId>,
    /// Earliest time a worker may claim the task.
    pub execute_after: Option<DateTime<Utc>>,
    /// Submitter attribution.
    pub created_by: Option<String>,
    /// Retry budget; the policy default applies when absent.
    pub max_retries: Option<u32>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
    /// How the child consumes its parent's output.
    pub output_mapping: OutputMapping,
}

impl CreateTaskRequest {
    /// Creates a request with default priority and no lineage.
    #[must_use]
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            priority: Priority::default(),
            parent_task_id: None,
            execute_after: None,
            created_by: None,
            max_retries: None,
            metadata: Map::new(),
            output_mapping: OutputMapping::None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Chains the task under `parent_task_id`.
    #[must_use]
    pub const fn with_parent(mut self, parent_task_id: TaskId) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    /// Defers claiming until `execute_after`.
    #[must_use]
    pub const fn with_execute_after(mut self, execute_after: DateTime<Utc>) -> Self {
        self.execute_after = Some(execute_after);
        self
    }

    /// Records who submitted the task.
    #[must_use]
    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Overrides the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the parent output mapping.
    #[must_use]
    pub const fn with_output_mapping(mut self, output_mapping: OutputMapping) -> Self {
        self.output_mapping = output_mapping;
        self
    }
}

/// Request to create a task from a built-in template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTaskFromTemplateRequest {
    /// Template identifier.
    pub template_id: String,
    /// Text substituted into the template.
    pub input_text: String,
    /// Display name; the template name is used when absent.
    pub name: Option<String>,
    /// Parent task in the lineage graph.
    pub parent_task_id: Option<TaskId>,
    /// Submitter attribution.
    pub created_by: Option<String>,
}

/// Turns newline-separated prompts into batch requests named
/// `Batch Task 1`, `Batch Task 2`, ….
///
/// Blank lines are skipped and do not consume a number.
#[must_use]
pub fn batch_requests_from_lines(text: &str) -> Vec<CreateTaskRequest> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| {
            CreateTaskRequest::new(format!("Batch Task {}", index.saturating_add(1)), line)
        })
        .collect()
}

impl<R, Q, C> Dispatcher<R, Q, C>
where
    R: TaskRepository,
    Q: WorkQueue,
    C: Clock + Send + Sync,
{
    /// Creates a task and hands it to the work queue.
    ///
    /// The returned task is `queued` when the queue accepted it. When the
    /// queue refuses, the task stays stored as `pending` and the call fails
    /// with [`ServiceError::Unavailable`].
    ///
    /// # Errors
    ///
    /// Returns a domain error for invalid input,
    /// [`ServiceError::ParentNotFound`] for an unknown parent, or
    /// [`ServiceError::Unavailable`] when the enqueue fails.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_task(&self, request: CreateTaskRequest) -> ServiceResult<Task> {
        let record = self.build_record(request, &mut HashMap::new()).await?;
        self.repository
            .store(&record)
            .await
            .map_err(map_store_error)?;
        let task = record.into_task();
        let task_id = task.id();
        info!(%task_id, parent_task_id = ?task.parent_task_id(), "task created");
        self.hand_off(task)
            .await
            .map_err(|err| err.for_task(task_id))
    }

    /// Creates several tasks all-or-nothing, then queues each of them.
    ///
    /// Every request is validated before anything is stored; one invalid
    /// request rejects the whole batch. Once stored, tasks the queue refuses
    /// stay `pending` and are listed in [`ServiceError::Unavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyBatch`] or
    /// [`TaskDomainError::BatchTooLarge`] for the batch size, any
    /// per-request validation error, or [`ServiceError::Unavailable`].
    #[instrument(skip(self, requests), fields(batch_size = requests.len()))]
    pub async fn batch_create_tasks(
        &self,
        requests: Vec<CreateTaskRequest>,
    ) -> ServiceResult<Vec<Task>> {
        self.settings.limits.check_batch_size(requests.len())?;
        let mut parents = HashMap::new();
        let mut records = Vec::with_capacity(requests.len());
        for request in requests {
            records.push(self.build_record(request, &mut parents).await?);
        }
        self.repository
            .store_batch(&records)
            .await
            .map_err(map_store_error)?;
        info!(count = records.len(), "task batch created");

        let tasks = records.into_iter().map(NewTaskRecord::into_task).collect();
        self.hand_off_all(tasks).await
    }

    /// Renders a built-in template and creates a task from the result.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::UnknownTemplate`],
    /// [`TaskDomainError::EmptyTemplateInput`], or any error of
    /// [`Dispatcher::create_task`].
    #[instrument(skip(self, request), fields(template_id = %request.template_id))]
    pub async fn create_from_template(
        &self,
        request: CreateTaskFromTemplateRequest,
    ) -> ServiceResult<Task> {
        let template = TaskTemplate::find(&request.template_id)?;
        let prompt = template.render(&request.input_text)?;
        let name = request
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| template.name.to_owned());

        let mut create = CreateTaskRequest::new(name, prompt);
        create.parent_task_id = request.parent_task_id;
        create.created_by = request.created_by;
        self.create_task(create).await
    }

    /// Lists the built-in templates.
    #[must_use]
    pub const fn list_templates(&self) -> &'static [TaskTemplate] {
        TaskTemplate::built_in()
    }

    /// Validates a request and builds the task plus its lineage write.
    ///
    /// `parents` caches parent lookups across a batch.
    async fn build_record(
        &self,
        request: CreateTaskRequest,
        parents: &mut HashMap<TaskId, Task>,
    ) -> ServiceResult<NewTaskRecord> {
        let draft = self.draft_from(&request)?;
        let task = match request.parent_task_id {
            None => Task::new(draft, &*self.clock)?,
            Some(parent_id) => {
                let parent = self.cached_parent(parent_id, parents).await?;
                Task::new_child(
                    draft,
                    parent,
                    &request.output_mapping,
                    self.settings.limits.max_prompt_chars,
                    &*self.clock,
                )?
            }
        };
        Ok(NewTaskRecord::new(task, request.output_mapping))
    }

    fn draft_from(&self, request: &CreateTaskRequest) -> Result<TaskDraft, TaskDomainError> {
        let name = TaskName::new(request.name.as_str())?;
        let prompt = Prompt::new(request.prompt.as_str(), self.settings.limits.max_prompt_chars)?;
        let created_by = match request.created_by.as_deref() {
            Some(value) => CreatedBy::new(value)?,
            None => None,
        };
        let max_retries = self
            .settings
            .retry_policy
            .max_retries_for(request.max_retries);

        Ok(TaskDraft::new(name, prompt, max_retries)
            .with_priority(request.priority)
            .with_execute_after(request.execute_after)
            .with_created_by(created_by)
            .with_metadata(request.metadata.clone()))
    }

    async fn cached_parent<'cache>(
        &self,
        parent_id: TaskId,
        parents: &'cache mut HashMap<TaskId, Task>,
    ) -> ServiceResult<&'cache Task> {
        if !parents.contains_key(&parent_id) {
            let parent = self
                .repository
                .find_by_id(parent_id)
                .await?
                .ok_or(ServiceError::ParentNotFound(parent_id))?;
            parents.insert(parent_id, parent);
        }
        parents
            .get(&parent_id)
            .ok_or(ServiceError::ParentNotFound(parent_id))
    }
}

fn map_store_error(err: TaskRepositoryError) -> ServiceError {
    match err {
        TaskRepositoryError::ParentNotFound(id) => ServiceError::ParentNotFound(id),
        other => ServiceError::Repository(other),
    }
}
