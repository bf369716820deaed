//! Port contracts for task lifecycle orchestration.
//!
//! Ports define infrastructure-agnostic interfaces used by task services:
//! the task store and attempt ledger, lineage reads, the external work
//! queue, and the language model.

pub mod llm;
pub mod queue;
pub mod repository;

pub use llm::{LlmClient, LlmCompletion, LlmError};
pub use queue::{
    Delivery, DeliveryTag, QueuedTask, WorkQueue, WorkQueueError, WorkQueueResult, WorkSource,
};
pub use repository::{
    LineageRepository, TaskPage, TaskRepository, TaskRepositoryError, TaskRepositoryResult,
};
