//! Work queue ports: the producer half used by the dispatcher and the
//! consumer half used by workers.

use crate::task::domain::{Priority, Task, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for work queue operations.
pub type WorkQueueResult<T> = Result<T, WorkQueueError>;

/// Message placed on the work queue for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedTask {
    /// Task to execute.
    pub task_id: TaskId,
    /// Ordering hint.
    pub priority: Priority,
    /// Ordering tie-breaker, earliest first.
    pub scheduled_at: DateTime<Utc>,
    /// Earliest time the message may be delivered.
    pub not_before: Option<DateTime<Utc>>,
}

impl From<&Task> for QueuedTask {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id(),
            priority: task.priority(),
            scheduled_at: task.scheduled_at(),
            not_before: task.execute_after(),
        }
    }
}

/// Receipt identifying one delivery for acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

/// One at-least-once delivery of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Acknowledgement receipt.
    pub tag: DeliveryTag,
    /// The delivered message.
    pub message: QueuedTask,
}

/// Producer side of the external work queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Hands a task to the queue.
    ///
    /// Returns once the queue has durably accepted the message.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkQueueError`] when the queue rejects or cannot be
    /// reached.
    async fn enqueue(&self, message: &QueuedTask) -> WorkQueueResult<()>;
}

/// Consumer side of the external work queue.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Waits for the next delivery.
    ///
    /// Returns `None` once the queue is closed and drained.
    async fn next_delivery(&self) -> WorkQueueResult<Option<Delivery>>;

    /// Acknowledges a handled delivery.
    async fn ack(&self, tag: DeliveryTag) -> WorkQueueResult<()>;

    /// Returns a delivery to the queue for redelivery.
    async fn nack(&self, tag: DeliveryTag) -> WorkQueueResult<()>;

    /// Returns a delivery to the queue, withholding it until `until`.
    ///
    /// The message leaves the in-flight set and re-enters the queue in one
    /// step, so it is never held only by the consumer.
    async fn defer(&self, tag: DeliveryTag, until: DateTime<Utc>) -> WorkQueueResult<()>;
}

/// Errors returned by work queue implementations.
#[derive(Debug, Clone, Error)]
pub enum WorkQueueError {
    /// The queue no longer accepts or delivers messages.
    #[error("work queue is closed")]
    Closed,

    /// The queue refused the message.
    #[error("work queue rejected message: {0}")]
    Rejected(String),

    /// The operation did not finish before its deadline.
    #[error("work queue operation timed out after {timeout_ms} ms")]
    Timeout {
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// The acknowledgement tag is not outstanding.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    /// Transport-level failure.
    #[error("work queue transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),
}

impl WorkQueueError {
    /// Wraps a transport error.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }
}
