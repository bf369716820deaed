//! Domain model for task lifecycle orchestration.
//!
//! The task domain models submission, the status state machine, execution
//! attempts, retry budgets, and the lineage graph while keeping all
//! infrastructure concerns outside of the domain boundary.

mod attempt;
mod error;
mod ids;
mod limits;
mod lineage;
mod retry;
mod task;
mod template;

pub use attempt::{
    AttemptOutcome, ExecutionAttempt, ExecutionReport, PersistedAttemptData, TokenUsage,
};
pub use error::{ParsePriorityError, ParseTaskStatusError, TaskDomainError};
pub use ids::{
    AttemptId, AttemptNumber, ChainId, CreatedBy, EdgeId, MAX_CREATED_BY_CHARS,
    MAX_TASK_NAME_CHARS, MAX_WORKER_ID_CHARS, Prompt, TaskId, TaskName, WorkerId,
};
pub use limits::{
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_PROMPT_CHARS, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
    TaskLimits, TaskListQuery,
};
pub use lineage::{
    Chain, DEFAULT_LINEAGE_DEPTH, LineageDepth, LineageEdge, LineageNode, LineageWrite,
    MAX_LINEAGE_DEPTH, NewTaskRecord, OutputMapping,
};
pub use retry::{DEFAULT_MAX_RETRIES, RetryPolicy};
pub use task::{Claimability, PersistedTaskData, Priority, Task, TaskDraft, TaskStatus};
pub use template::TaskTemplate;
