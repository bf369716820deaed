//! Shared test helpers for in-memory integration tests.

use async_trait::async_trait;
use conductor::task::{
    adapters::memory::{InMemoryTaskRepository, InMemoryWorkQueue},
    domain::{Prompt, WorkerId},
    ports::{LlmClient, LlmCompletion, LlmError},
    services::{Dispatcher, Worker, WorkerStats},
};
use mockable::DefaultClock;
use rstest::fixture;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Dispatcher wired to the in-memory adapters.
pub type TestDispatcher = Dispatcher<InMemoryTaskRepository, InMemoryWorkQueue, DefaultClock>;

/// Dispatcher plus the repository and queue behind it.
pub struct Stack {
    pub dispatcher: TestDispatcher,
    pub repository: Arc<InMemoryTaskRepository>,
    pub queue: Arc<InMemoryWorkQueue>,
}

/// Provides a fresh dispatcher over empty in-memory adapters.
#[fixture]
pub fn stack() -> Stack {
    let repository = Arc::new(InMemoryTaskRepository::new());
    let queue = Arc::new(InMemoryWorkQueue::new());
    Stack {
        dispatcher: Dispatcher::new(
            Arc::clone(&repository),
            Arc::clone(&queue),
            Arc::new(DefaultClock),
        ),
        repository,
        queue,
    }
}

/// Language model that echoes prompts and remembers the order it saw them.
#[derive(Debug, Default)]
pub struct EchoLlm {
    seen: Mutex<Vec<String>>,
}

impl EchoLlm {
    /// Prompts received so far, in invocation order.
    pub fn seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for EchoLlm {
    async fn invoke(&self, prompt: &Prompt) -> Result<LlmCompletion, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(prompt.as_str().to_owned());
        }
        tokio::task::yield_now().await;
        Ok(LlmCompletion {
            output: format!("echo: {}", prompt.as_str()),
            usage: None,
            model: Some("echo".to_owned()),
        })
    }
}

/// Closes the queue and drains it with `workers` concurrent workers.
///
/// # Errors
///
/// Returns an error if the queue cannot be closed or a worker fails.
pub async fn drain_with_pool(
    stack: &Stack,
    llm: Arc<EchoLlm>,
    workers: usize,
) -> eyre::Result<Vec<WorkerStats>> {
    stack.queue.close()?;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::with_capacity(workers);
    for index in 0..workers {
        let worker = Worker::new(
            stack.dispatcher.clone(),
            Arc::clone(&llm),
            WorkerId::new(format!("pool-{index}"))?,
        );
        let queue = Arc::clone(&stack.queue);
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            worker.run(queue.as_ref(), shutdown).await
        }));
    }
    let mut stats = Vec::with_capacity(workers);
    for handle in handles {
        stats.push(handle.await??);
    }
    Ok(stats)
}
