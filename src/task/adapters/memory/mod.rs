//! In-memory adapters for the task store and work queue.
//!
//! These back the integration tests and the operator binary when no database
//! is configured.

mod queue;
mod task;

pub use queue::InMemoryWorkQueue;
pub use task::InMemoryTaskRepository;
