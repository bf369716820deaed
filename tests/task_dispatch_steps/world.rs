//! Shared world state for task dispatch BDD scenarios.

use std::sync::Arc;

use conductor::task::{
    adapters::memory::{InMemoryTaskRepository, InMemoryWorkQueue},
    domain::{AttemptId, Task, TaskId},
    services::{CompletionOutcome, Dispatcher},
};
use mockable::DefaultClock;
use rstest::fixture;

/// Dispatcher type used by the BDD world.
pub type TestDispatcher = Dispatcher<InMemoryTaskRepository, InMemoryWorkQueue, DefaultClock>;

/// Scenario world for task dispatch behaviour tests.
pub struct DispatchWorld {
    pub dispatcher: TestDispatcher,
    pub queue: Arc<InMemoryWorkQueue>,
    pub task_id: Option<TaskId>,
    pub attempt_id: Option<AttemptId>,
    pub batch: Vec<Task>,
    pub completion: Option<CompletionOutcome>,
}

impl DispatchWorld {
    /// Creates a world backed by empty in-memory adapters.
    #[must_use]
    pub fn new() -> Self {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let dispatcher = Dispatcher::new(
            Arc::new(InMemoryTaskRepository::new()),
            Arc::clone(&queue),
            Arc::new(DefaultClock),
        );

        Self {
            dispatcher,
            queue,
            task_id: None,
            attempt_id: None,
            batch: Vec::new(),
            completion: None,
        }
    }

    /// Returns the task the scenario is working with.
    pub fn task_id(&self) -> Result<TaskId, eyre::Report> {
        self.task_id
            .ok_or_else(|| eyre::eyre!("missing task in scenario world"))
    }

    /// Reloads the current task from the store.
    pub fn current_task(&self) -> Result<Task, eyre::Report> {
        let task_id = self.task_id()?;
        Ok(run_async(self.dispatcher.get_task(task_id))?)
    }
}

impl Default for DispatchWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> DispatchWorld {
    DispatchWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
