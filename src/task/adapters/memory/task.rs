//! In-memory task store, attempt ledger, and lineage graph.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::task::{
    domain::{
        AttemptId, Chain, ChainId, ExecutionAttempt, LineageEdge, LineageWrite, NewTaskRecord,
        Task, TaskId, TaskListQuery, TaskStatus,
    },
    ports::{
        LineageRepository, TaskPage, TaskRepository, TaskRepositoryError, TaskRepositoryResult,
    },
};

/// Thread-safe in-memory task repository.
///
/// Each operation holds the state lock for its whole duration, which makes
/// every conditional write a compare-and-swap.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    state: Arc<RwLock<InMemoryTaskState>>,
}

#[derive(Debug, Default)]
struct InMemoryTaskState {
    tasks: HashMap<TaskId, Task>,
    attempts: HashMap<AttemptId, ExecutionAttempt>,
    attempts_by_task: HashMap<TaskId, Vec<AttemptId>>,
    chains: HashMap<ChainId, Chain>,
    chain_by_root: HashMap<TaskId, ChainId>,
    parent_edge: HashMap<TaskId, LineageEdge>,
    child_edges: HashMap<TaskId, Vec<LineageEdge>>,
}

impl InMemoryTaskRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> TaskRepositoryResult<RwLockReadGuard<'_, InMemoryTaskState>> {
        self.state.read().map_err(|err| {
            TaskRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write(&self) -> TaskRepositoryResult<RwLockWriteGuard<'_, InMemoryTaskState>> {
        self.state.write().map_err(|err| {
            TaskRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

/// Checks a batch against current state without mutating it.
fn validate_records(
    state: &InMemoryTaskState,
    records: &[NewTaskRecord],
) -> TaskRepositoryResult<()> {
    let mut staged: HashSet<TaskId> = HashSet::new();
    for record in records {
        let task_id = record.task().id();
        if state.tasks.contains_key(&task_id) || !staged.insert(task_id) {
            return Err(TaskRepositoryError::DuplicateTask(task_id));
        }
        if let LineageWrite::AttachChild { parent_task_id, .. } = record.lineage() {
            let parent_known =
                state.tasks.contains_key(parent_task_id) || staged.contains(parent_task_id);
            if !parent_known || *parent_task_id == task_id {
                return Err(TaskRepositoryError::ParentNotFound(*parent_task_id));
            }
        }
    }
    Ok(())
}

/// Resolves the chain the parent already belongs to, creating one rooted at
/// the parent when it has none.
fn resolve_chain(state: &mut InMemoryTaskState, parent: &Task, child: &Task) -> ChainId {
    if let Some(edge) = state.parent_edge.get(&parent.id()) {
        return edge.chain_id();
    }
    if let Some(chain_id) = state.chain_by_root.get(&parent.id()) {
        return *chain_id;
    }
    let chain = Chain::rooted_at(parent, child.created_at());
    let chain_id = chain.id();
    state.chain_by_root.insert(parent.id(), chain_id);
    state.chains.insert(chain_id, chain);
    chain_id
}

fn insert_record(state: &mut InMemoryTaskState, record: &NewTaskRecord) -> TaskRepositoryResult<()> {
    let task = record.task();
    if let LineageWrite::AttachChild {
        parent_task_id,
        child_task_id,
        output_mapping,
    } = record.lineage()
    {
        let parent = state
            .tasks
            .get(parent_task_id)
            .cloned()
            .ok_or(TaskRepositoryError::ParentNotFound(*parent_task_id))?;
        let chain_id = resolve_chain(state, &parent, task);
        let edge = LineageEdge::new(
            chain_id,
            *parent_task_id,
            *child_task_id,
            *output_mapping,
            task.created_at(),
        )
        .map_err(TaskRepositoryError::persistence)?;
        if let Some(chain) = state.chains.get_mut(&chain_id) {
            chain.touch(task.created_at());
        }
        state.parent_edge.insert(*child_task_id, edge.clone());
        state
            .child_edges
            .entry(*parent_task_id)
            .or_default()
            .push(edge);
    }
    state.tasks.insert(task.id(), task.clone());
    Ok(())
}

fn matches_query(task: &Task, query: &TaskListQuery) -> bool {
    if query.status().is_some_and(|status| task.status() != status) {
        return false;
    }
    query.search().is_none_or(|search| {
        let needle = search.to_lowercase();
        task.name().as_str().to_lowercase().contains(&needle)
            || task.prompt().as_str().to_lowercase().contains(&needle)
    })
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn store(&self, record: &NewTaskRecord) -> TaskRepositoryResult<()> {
        self.store_batch(std::slice::from_ref(record)).await
    }

    async fn store_batch(&self, records: &[NewTaskRecord]) -> TaskRepositoryResult<()> {
        let mut state = self.write()?;
        validate_records(&state, records)?;
        for record in records {
            insert_record(&mut state, record)?;
        }
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<Task>> {
        let state = self.read()?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[TaskId]) -> TaskRepositoryResult<Vec<Task>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    async fn list(&self, query: &TaskListQuery) -> TaskRepositoryResult<TaskPage> {
        let state = self.read()?;
        let mut matching: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| matches_query(task, query))
            .collect();
        matching.sort_by(|left, right| {
            right
                .created_at()
                .cmp(&left.created_at())
                .then_with(|| right.id().cmp(&left.id()))
        });
        let total_count = u64::try_from(matching.len()).map_err(TaskRepositoryError::persistence)?;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.limit()).map_err(TaskRepositoryError::persistence)?;
        let tasks = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(TaskPage::new(tasks, total_count, query.offset()))
    }

    async fn update_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> TaskRepositoryResult<bool> {
        let mut state = self.write()?;
        let stored = state
            .tasks
            .get_mut(&task.id())
            .ok_or(TaskRepositoryError::NotFound(task.id()))?;
        if stored.status() != expected {
            return Ok(false);
        }
        *stored = task.clone();
        Ok(true)
    }

    async fn claim(
        &self,
        task: &Task,
        expected: TaskStatus,
        attempt: &ExecutionAttempt,
    ) -> TaskRepositoryResult<bool> {
        let mut state = self.write()?;
        let stored_status = state
            .tasks
            .get(&task.id())
            .map(Task::status)
            .ok_or(TaskRepositoryError::NotFound(task.id()))?;
        if stored_status != expected {
            return Ok(false);
        }
        let number_taken = state
            .attempts_by_task
            .get(&task.id())
            .into_iter()
            .flatten()
            .filter_map(|id| state.attempts.get(id))
            .any(|existing| existing.attempt_number() == attempt.attempt_number());
        if number_taken {
            return Err(TaskRepositoryError::DuplicateAttempt {
                task_id: task.id(),
                attempt_number: attempt.attempt_number(),
            });
        }
        state.tasks.insert(task.id(), task.clone());
        state.attempts.insert(attempt.id(), attempt.clone());
        state
            .attempts_by_task
            .entry(task.id())
            .or_default()
            .push(attempt.id());
        Ok(true)
    }

    async fn record_outcome(
        &self,
        attempt: &ExecutionAttempt,
        task: Option<&Task>,
    ) -> TaskRepositoryResult<bool> {
        let mut state = self.write()?;
        let stored_attempt = state
            .attempts
            .get_mut(&attempt.id())
            .ok_or(TaskRepositoryError::AttemptNotFound(attempt.id()))?;
        if stored_attempt.is_completed() {
            return Err(TaskRepositoryError::AttemptAlreadyRecorded(attempt.id()));
        }
        *stored_attempt = attempt.clone();

        let Some(task) = task else {
            return Ok(false);
        };
        match state.tasks.get_mut(&task.id()) {
            Some(stored) if stored.status() == TaskStatus::Running => {
                *stored = task.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(TaskRepositoryError::NotFound(task.id())),
        }
    }

    async fn find_attempt(&self, id: AttemptId) -> TaskRepositoryResult<Option<ExecutionAttempt>> {
        let state = self.read()?;
        Ok(state.attempts.get(&id).cloned())
    }

    async fn attempts_for_task(
        &self,
        task_id: TaskId,
    ) -> TaskRepositoryResult<Vec<ExecutionAttempt>> {
        let state = self.read()?;
        let mut attempts: Vec<ExecutionAttempt> = state
            .attempts_by_task
            .get(&task_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.attempts.get(id).cloned())
            .collect();
        attempts.sort_by_key(ExecutionAttempt::attempt_number);
        Ok(attempts)
    }
}

#[async_trait]
impl LineageRepository for InMemoryTaskRepository {
    async fn parent_edge(&self, child: TaskId) -> TaskRepositoryResult<Option<LineageEdge>> {
        let state = self.read()?;
        Ok(state.parent_edge.get(&child).cloned())
    }

    async fn child_edges(&self, parent: TaskId) -> TaskRepositoryResult<Vec<LineageEdge>> {
        let state = self.read()?;
        Ok(state.child_edges.get(&parent).cloned().unwrap_or_default())
    }

    async fn chain_containing(&self, task: TaskId) -> TaskRepositoryResult<Option<Chain>> {
        let state = self.read()?;
        let chain_id = state
            .parent_edge
            .get(&task)
            .map(LineageEdge::chain_id)
            .or_else(|| state.chain_by_root.get(&task).copied());
        Ok(chain_id.and_then(|id| state.chains.get(&id).cloned()))
    }

    async fn chain_edges(&self, chain: ChainId) -> TaskRepositoryResult<Vec<LineageEdge>> {
        let state = self.read()?;
        let mut edges: Vec<LineageEdge> = state
            .parent_edge
            .values()
            .filter(|edge| edge.chain_id() == chain)
            .cloned()
            .collect();
        edges.sort_by_key(|edge| (edge.created_at(), edge.id()));
        Ok(edges)
    }
}
