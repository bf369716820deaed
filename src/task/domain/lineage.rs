//! Lineage graph types: chains, edges, and the single write command that
//! keeps the denormalized parent pointer and the edge table in agreement.

use super::{ChainId, EdgeId, Prompt, Task, TaskDomainError, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum traversal depth accepted by lineage queries.
pub const MAX_LINEAGE_DEPTH: u32 = 20;

/// Traversal depth used when the caller does not supply one.
pub const DEFAULT_LINEAGE_DEPTH: u32 = 10;

/// How a child task consumes its parent's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputMapping {
    /// The child prompt is used as submitted.
    #[default]
    None,
    /// The parent output is prepended to the child prompt.
    PrependParentOutput,
}

impl OutputMapping {
    /// Applies the mapping to a child prompt bounded by `max_chars`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::PromptTooLong`] when the mapped prompt no
    /// longer fits.
    pub fn apply(
        &self,
        prompt: &Prompt,
        parent_output: &str,
        max_chars: usize,
    ) -> Result<Prompt, TaskDomainError> {
        match self {
            Self::None => Ok(prompt.clone()),
            Self::PrependParentOutput => prompt.with_parent_output(parent_output, max_chars),
        }
    }
}

/// Group of tasks connected by lineage edges, rooted at one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    id: ChainId,
    root_task_id: TaskId,
    name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Chain {
    /// Creates a chain rooted at `root`.
    #[must_use]
    pub fn rooted_at(root: &Task, now: DateTime<Utc>) -> Self {
        Self {
            id: ChainId::new(),
            root_task_id: root.id(),
            name: Some(root.name().as_str().to_owned()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reconstructs a chain from persisted storage.
    #[must_use]
    pub const fn from_persisted(
        id: ChainId,
        root_task_id: TaskId,
        name: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            root_task_id,
            name,
            created_at,
            updated_at,
        }
    }

    /// Returns the chain identifier.
    #[must_use]
    pub const fn id(&self) -> ChainId {
        self.id
    }

    /// Returns the root task.
    #[must_use]
    pub const fn root_task_id(&self) -> TaskId {
        self.root_task_id
    }

    /// Returns the display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest modification timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Records that the chain gained a member at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Derives a chain status from its member statuses.
    ///
    /// Any failure dominates, then active work, then waiting work, then
    /// cancellation. A chain is completed only when every member is.
    #[must_use]
    pub fn derive_status(statuses: impl IntoIterator<Item = TaskStatus>) -> Option<TaskStatus> {
        let statuses: Vec<TaskStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return None;
        }
        let precedence = [
            TaskStatus::Failed,
            TaskStatus::Running,
            TaskStatus::Queued,
            TaskStatus::Pending,
            TaskStatus::Cancelled,
        ];
        precedence
            .into_iter()
            .find(|candidate| statuses.contains(candidate))
            .or(Some(TaskStatus::Completed))
    }
}

/// Canonical parent→child relationship inside a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    id: EdgeId,
    chain_id: ChainId,
    parent_task_id: TaskId,
    child_task_id: TaskId,
    output_mapping: OutputMapping,
    created_at: DateTime<Utc>,
}

impl LineageEdge {
    /// Creates a new edge.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::SelfReference`] when parent and child are
    /// the same task.
    pub fn new(
        chain_id: ChainId,
        parent_task_id: TaskId,
        child_task_id: TaskId,
        output_mapping: OutputMapping,
        created_at: DateTime<Utc>,
    ) -> Result<Self, TaskDomainError> {
        if parent_task_id == child_task_id {
            return Err(TaskDomainError::SelfReference(child_task_id));
        }
        Ok(Self {
            id: EdgeId::new(),
            chain_id,
            parent_task_id,
            child_task_id,
            output_mapping,
            created_at,
        })
    }

    /// Reconstructs an edge from persisted storage.
    #[must_use]
    pub const fn from_persisted(
        id: EdgeId,
        chain_id: ChainId,
        parent_task_id: TaskId,
        child_task_id: TaskId,
        output_mapping: OutputMapping,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            chain_id,
            parent_task_id,
            child_task_id,
            output_mapping,
            created_at,
        }
    }

    /// Returns the edge identifier.
    #[must_use]
    pub const fn id(&self) -> EdgeId {
        self.id
    }

    /// Returns the owning chain.
    #[must_use]
    pub const fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Returns the parent task.
    #[must_use]
    pub const fn parent_task_id(&self) -> TaskId {
        self.parent_task_id
    }

    /// Returns the child task.
    #[must_use]
    pub const fn child_task_id(&self) -> TaskId {
        self.child_task_id
    }

    /// Returns how the child consumes the parent output.
    #[must_use]
    pub const fn output_mapping(&self) -> OutputMapping {
        self.output_mapping
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Lineage half of a task insert.
///
/// Built only by [`NewTaskRecord::new`], which derives it from the task's
/// own parent pointer so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineageWrite {
    /// The task has no parent; nothing is written to the edge table.
    Root,
    /// The task is attached under a parent.
    AttachChild {
        /// Parent task.
        parent_task_id: TaskId,
        /// Child task.
        child_task_id: TaskId,
        /// How the child consumes the parent output.
        output_mapping: OutputMapping,
    },
}

/// A task together with the lineage write that must accompany it.
///
/// Repositories persist the task row, resolve or create the chain, and
/// insert the edge as one atomic unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskRecord {
    task: Task,
    lineage: LineageWrite,
}

impl NewTaskRecord {
    /// Pairs `task` with the lineage write implied by its parent pointer.
    ///
    /// `output_mapping` is ignored for root tasks.
    #[must_use]
    pub fn new(task: Task, output_mapping: OutputMapping) -> Self {
        let lineage = match task.parent_task_id() {
            Some(parent_task_id) => LineageWrite::AttachChild {
                parent_task_id,
                child_task_id: task.id(),
                output_mapping,
            },
            None => LineageWrite::Root,
        };
        Self { task, lineage }
    }

    /// Returns the task to insert.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    /// Returns the lineage write.
    #[must_use]
    pub const fn lineage(&self) -> &LineageWrite {
        &self.lineage
    }

    /// Consumes the record, returning the task.
    #[must_use]
    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Validated lineage traversal depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineageDepth(u32);

impl LineageDepth {
    /// Creates a validated depth.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidLineageDepth`] outside
    /// `1..=MAX_LINEAGE_DEPTH`.
    pub const fn new(value: u32) -> Result<Self, TaskDomainError> {
        if value == 0 || value > MAX_LINEAGE_DEPTH {
            return Err(TaskDomainError::InvalidLineageDepth {
                requested: value,
                max: MAX_LINEAGE_DEPTH,
            });
        }
        Ok(Self(value))
    }

    /// Returns the numeric depth.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl Default for LineageDepth {
    fn default() -> Self {
        Self(DEFAULT_LINEAGE_DEPTH)
    }
}

/// A task reached during lineage traversal and its distance from the
/// origin; depth 1 is an immediate neighbour.
#[derive(Debug, Clone, PartialEq)]
pub struct LineageNode {
    /// Task reached.
    pub task: Task,
    /// Distance from the traversal origin.
    pub depth: u32,
}
