//! Lineage queries over the canonical edge set.

use super::{ServiceError, ServiceResult};
use crate::task::{
    domain::{Chain, LineageDepth, LineageEdge, LineageNode, Task, TaskId, TaskStatus},
    ports::{LineageRepository, TaskRepository},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Lineage view centred on one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskLineage {
    /// The task the lineage was requested for.
    pub root_task: Task,
    /// Ancestors, nearest first.
    pub ancestors: Vec<LineageNode>,
    /// Descendants in breadth-first order.
    pub descendants: Vec<LineageNode>,
    /// Chain the task belongs to, if it has any lineage.
    pub chain: Option<Chain>,
    /// Status derived from every member of the chain.
    pub chain_status: Option<TaskStatus>,
}

/// Walks ancestors and descendants through lineage edges.
///
/// Traversal always follows the edge table, never the denormalized parent
/// pointer on the task row, and is bounded by the requested depth.
pub struct LineageService<R>
where
    R: TaskRepository + LineageRepository,
{
    repository: Arc<R>,
}

impl<R> Clone for LineageService<R>
where
    R: TaskRepository + LineageRepository,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> LineageService<R>
where
    R: TaskRepository + LineageRepository,
{
    /// Creates a lineage service over `repository`.
    #[must_use]
    pub const fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Returns the ancestors of `task_id`, nearest first; depth 1 is the
    /// immediate parent.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TaskNotFound`] for an unknown task.
    #[instrument(skip(self))]
    pub async fn ancestors(
        &self,
        task_id: TaskId,
        max_depth: LineageDepth,
    ) -> ServiceResult<Vec<LineageNode>> {
        self.require(task_id).await?;
        let mut nodes = Vec::new();
        let mut visited = HashSet::from([task_id]);
        let mut current = task_id;
        for depth in 1..=max_depth.value() {
            let Some(edge) = self.repository.parent_edge(current).await? else {
                break;
            };
            let parent_id = edge.parent_task_id();
            if !visited.insert(parent_id) {
                debug!(%task_id, %parent_id, "lineage cycle detected, stopping ancestor walk");
                break;
            }
            let Some(parent) = self.repository.find_by_id(parent_id).await? else {
                break;
            };
            nodes.push(LineageNode {
                task: parent,
                depth,
            });
            current = parent_id;
        }
        Ok(nodes)
    }

    /// Returns the descendants of `task_id` breadth-first; depth 1 holds the
    /// direct children.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TaskNotFound`] for an unknown task.
    #[instrument(skip(self))]
    pub async fn descendants(
        &self,
        task_id: TaskId,
        max_depth: LineageDepth,
    ) -> ServiceResult<Vec<LineageNode>> {
        self.require(task_id).await?;
        self.walk_down(task_id, max_depth.value()).await
    }

    /// Returns the task with its ancestors, descendants, and chain.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::TaskNotFound`] for an unknown task.
    #[instrument(skip(self))]
    pub async fn get_lineage(
        &self,
        task_id: TaskId,
        max_depth: LineageDepth,
    ) -> ServiceResult<TaskLineage> {
        let root_task = self.require(task_id).await?;
        let ancestors = self.ancestors(task_id, max_depth).await?;
        let descendants = self.walk_down(task_id, max_depth.value()).await?;
        let chain = self.repository.chain_containing(task_id).await?;
        let chain_status = match &chain {
            Some(found) => self.chain_status(found).await?,
            None => None,
        };

        Ok(TaskLineage {
            root_task,
            ancestors,
            descendants,
            chain,
            chain_status,
        })
    }

    /// Derives a chain's status from its root and every member edge.
    async fn chain_status(&self, chain: &Chain) -> ServiceResult<Option<TaskStatus>> {
        let mut member_ids = vec![chain.root_task_id()];
        let edges = self.repository.chain_edges(chain.id()).await?;
        member_ids.extend(edges.iter().map(LineageEdge::child_task_id));
        let members = self.repository.find_many(&member_ids).await?;
        Ok(Chain::derive_status(members.iter().map(Task::status)))
    }

    async fn walk_down(&self, task_id: TaskId, max_depth: u32) -> ServiceResult<Vec<LineageNode>> {
        let mut nodes = Vec::new();
        let mut visited = HashSet::from([task_id]);
        let mut frontier = vec![task_id];
        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for parent_id in &frontier {
                for edge in self.repository.child_edges(*parent_id).await? {
                    let child_id = edge.child_task_id();
                    if visited.insert(child_id) {
                        next.push(child_id);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            let children = self.repository.find_many(&next).await?;
            nodes.extend(children.into_iter().map(|task| LineageNode { task, depth }));
            frontier = next;
        }
        Ok(nodes)
    }

    async fn require(&self, task_id: TaskId) -> ServiceResult<Task> {
        self.repository
            .find_by_id(task_id)
            .await?
            .ok_or(ServiceError::TaskNotFound(task_id))
    }
}
