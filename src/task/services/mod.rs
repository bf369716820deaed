//! Application services for task lifecycle orchestration.

mod dispatcher;
mod error;
mod lineage;
mod worker;

pub use dispatcher::{
    ClaimOutcome, ClaimedExecution, CompletionOutcome, CreateTaskFromTemplateRequest,
    CreateTaskRequest, DEFAULT_ENQUEUE_TIMEOUT, Dispatcher, DispatcherSettings, TaskDetails,
    batch_requests_from_lines,
};
pub use error::{ErrorCategory, ErrorReport, ServiceError, ServiceResult};
pub use lineage::{LineageService, TaskLineage};
pub use worker::{DEFAULT_INVOKE_TIMEOUT, Worker, WorkerStats};
