//! In-memory priority work queue with at-least-once delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::task::ports::{
    Delivery, DeliveryTag, QueuedTask, WorkQueue, WorkQueueError, WorkQueueResult, WorkSource,
};

/// Thread-safe in-memory work queue.
///
/// Messages are delivered highest priority first, then earliest
/// `scheduled_at`, then in arrival order. A message carrying `not_before`
/// is withheld until the queue clock reaches it. Deliveries stay in flight
/// until acknowledged; a negative acknowledgement or a deferral puts the
/// message back.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
}

impl Default for QueueInner {
    fn default() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }
}

impl QueueInner {
    fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            clock,
        }
    }
}

impl fmt::Debug for QueueInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueInner")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: BinaryHeap<ReadyEntry>,
    delayed: Vec<ReadyEntry>,
    in_flight: HashMap<DeliveryTag, QueuedTask>,
    next_sequence: u64,
    closed: bool,
    unavailable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    message: QueuedTask,
    sequence: u64,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.message.scheduled_at.cmp(&self.message.scheduled_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What a consumer found when it looked at the queue.
enum Take {
    Delivered(Delivery),
    Drained,
    Wait(Option<Duration>),
}

impl InMemoryWorkQueue {
    /// Creates an empty open queue on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty open queue that judges `not_before` against
    /// `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(QueueInner::with_clock(clock)),
        }
    }

    /// Stops accepting messages and wakes waiting consumers.
    ///
    /// Messages already queued, including withheld ones, are still
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns [`WorkQueueError::Transport`] if the queue lock is poisoned.
    pub fn close(&self) -> WorkQueueResult<()> {
        self.lock()?.closed = true;
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Makes the queue refuse new messages until re-enabled, simulating a
    /// broker outage.
    ///
    /// # Errors
    ///
    /// Returns [`WorkQueueError::Transport`] if the queue lock is poisoned.
    pub fn set_available(&self, available: bool) -> WorkQueueResult<()> {
        self.lock()?.unavailable = !available;
        Ok(())
    }

    /// Returns the number of messages waiting for delivery, withheld ones
    /// included.
    ///
    /// # Errors
    ///
    /// Returns [`WorkQueueError::Transport`] if the queue lock is poisoned.
    pub fn ready_len(&self) -> WorkQueueResult<usize> {
        let state = self.lock()?;
        Ok(state.ready.len() + state.delayed.len())
    }

    /// Returns the number of messages withheld until their `not_before`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkQueueError::Transport`] if the queue lock is poisoned.
    pub fn delayed_len(&self) -> WorkQueueResult<usize> {
        Ok(self.lock()?.delayed.len())
    }

    /// Returns the number of delivered but unacknowledged messages.
    ///
    /// # Errors
    ///
    /// Returns [`WorkQueueError::Transport`] if the queue lock is poisoned.
    pub fn in_flight_len(&self) -> WorkQueueResult<usize> {
        Ok(self.lock()?.in_flight.len())
    }

    fn lock(&self) -> WorkQueueResult<MutexGuard<'_, QueueState>> {
        self.inner
            .state
            .lock()
            .map_err(|err| WorkQueueError::transport(std::io::Error::other(err.to_string())))
    }

    fn try_take(&self) -> WorkQueueResult<Take> {
        let now = self.inner.clock.utc();
        let mut state = self.lock()?;
        state.promote_due(now);
        if let Some(entry) = state.ready.pop() {
            let tag = DeliveryTag(entry.sequence);
            state.in_flight.insert(tag, entry.message);
            return Ok(Take::Delivered(Delivery {
                tag,
                message: entry.message,
            }));
        }
        if let Some(due) = state.next_due() {
            return Ok(Take::Wait(Some((due - now).to_std().unwrap_or(Duration::ZERO))));
        }
        if state.closed {
            return Ok(Take::Drained);
        }
        Ok(Take::Wait(None))
    }
}

impl QueueState {
    fn push(&mut self, message: QueuedTask, now: DateTime<Utc>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let entry = ReadyEntry { message, sequence };
        match message.not_before {
            Some(not_before) if not_before > now => self.delayed.push(entry),
            _ => self.ready.push(entry),
        }
    }

    /// Moves withheld messages whose time has come onto the ready heap.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .delayed
            .drain(..)
            .partition(|entry| entry.message.not_before.is_none_or(|at| at <= now));
        self.delayed = waiting;
        self.ready.extend(due);
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.delayed
            .iter()
            .filter_map(|entry| entry.message.not_before)
            .min()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, message: &QueuedTask) -> WorkQueueResult<()> {
        let now = self.inner.clock.utc();
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(WorkQueueError::Closed);
            }
            if state.unavailable {
                return Err(WorkQueueError::Rejected("queue unavailable".to_owned()));
            }
            state.push(*message, now);
        }
        self.inner.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl WorkSource for InMemoryWorkQueue {
    async fn next_delivery(&self) -> WorkQueueResult<Option<Delivery>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.try_take()? {
                Take::Delivered(delivery) => return Ok(Some(delivery)),
                Take::Drained => return Ok(None),
                Take::Wait(None) => notified.await,
                Take::Wait(Some(delay)) => {
                    tokio::select! {
                        () = notified.as_mut() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> WorkQueueResult<()> {
        self.lock()?
            .in_flight
            .remove(&tag)
            .map(|_| ())
            .ok_or(WorkQueueError::UnknownDelivery(tag.0))
    }

    async fn nack(&self, tag: DeliveryTag) -> WorkQueueResult<()> {
        let now = self.inner.clock.utc();
        {
            let mut state = self.lock()?;
            let message = state
                .in_flight
                .remove(&tag)
                .ok_or(WorkQueueError::UnknownDelivery(tag.0))?;
            state.push(message, now);
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn defer(&self, tag: DeliveryTag, until: DateTime<Utc>) -> WorkQueueResult<()> {
        let now = self.inner.clock.utc();
        {
            let mut state = self.lock()?;
            let message = state
                .in_flight
                .remove(&tag)
                .ok_or(WorkQueueError::UnknownDelivery(tag.0))?;
            state.push(
                QueuedTask {
                    not_before: Some(until),
                    ..message
                },
                now,
            );
        }
        self.inner.notify.notify_one();
        Ok(())
    }
}
