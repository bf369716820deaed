//! Submits a file of prompts as batch tasks and drives them to completion
//! with an in-process worker pool.
//!
//! Usage:
//!
//! ```text
//! conductor <prompts-file> [config-path]
//! ```
//!
//! Each non-blank line of `prompts-file` becomes one task named
//! `Batch Task {n}`. Settings come from `config-path` (or `conductor.toml`)
//! layered under `CONDUCTOR__…` environment variables. When
//! `database.url` is set tasks are stored in `PostgreSQL`, otherwise in
//! memory.

use conductor::config::Settings;
use conductor::task::{
    adapters::{
        llm::OpenAiCompatibleClient,
        memory::{InMemoryTaskRepository, InMemoryWorkQueue},
        postgres::{PostgresTaskRepository, TaskPgPool},
    },
    domain::{TaskDomainError, TaskId, TaskStatus, WorkerId},
    ports::{LlmError, TaskRepository, WorkQueueError},
    services::{
        CreateTaskRequest, Dispatcher, ServiceError, Worker, WorkerStats,
        batch_requests_from_lines,
    },
};
use conductor::telemetry::{self, TelemetryError};
use diesel::r2d2::{ConnectionManager, Pool};
use mockable::DefaultClock;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Builder;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors that end a run.
#[derive(Debug, Error)]
enum RunError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("failed to load settings: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("failed to read prompts: {0}")]
    ReadPrompts(#[source] std::io::Error),
    #[error("failed to build language model client: {0}")]
    Llm(#[from] LlmError),
    #[error("failed to connect to the task store: {0}")]
    Database(#[from] diesel::r2d2::PoolError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("invalid worker identifier: {0}")]
    WorkerId(#[from] TaskDomainError),
    #[error("work queue failure: {0}")]
    Queue(#[from] WorkQueueError),
    #[error("runtime failure: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("worker task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

struct Args {
    prompts: PathBuf,
    config: Option<PathBuf>,
}

fn main() -> Result<(), BoxError> {
    let args = parse_args(std::env::args_os().skip(1).map(PathBuf::from))?;
    let settings = Settings::load(args.config.as_deref()).map_err(RunError::from)?;
    telemetry::init(&settings.telemetry).map_err(RunError::from)?;
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RunError::Runtime)?;
    runtime.block_on(run(&args, &settings)).map_err(|err| {
        error!(error = %err, "conductor run failed");
        err.into()
    })
}

fn parse_args(mut args: impl Iterator<Item = PathBuf>) -> Result<Args, RunError> {
    let prompts = args.next().ok_or_else(|| {
        RunError::InvalidArgs("usage: conductor <prompts-file> [config-path]".to_owned())
    })?;
    let config = args.next();
    if args.next().is_some() {
        return Err(RunError::InvalidArgs(
            "expected at most two arguments".to_owned(),
        ));
    }
    Ok(Args { prompts, config })
}

async fn run(args: &Args, settings: &Settings) -> Result<(), RunError> {
    let text = tokio::fs::read_to_string(&args.prompts)
        .await
        .map_err(RunError::ReadPrompts)?;
    let requests = batch_requests_from_lines(&text);
    if requests.is_empty() {
        warn!(path = %args.prompts.display(), "no prompts to submit");
        return Ok(());
    }
    let llm = Arc::new(OpenAiCompatibleClient::new(settings.llm.to_openai_settings())?);

    match &settings.database.url {
        Some(url) => {
            let pool: TaskPgPool = Pool::builder()
                .max_size(settings.database.pool_size)
                .build(ConnectionManager::new(url.expose_secret()))?;
            info!("using PostgreSQL task store");
            drive(Arc::new(PostgresTaskRepository::new(pool)), llm, settings, requests).await
        }
        None => {
            info!("using in-memory task store");
            drive(Arc::new(InMemoryTaskRepository::new()), llm, settings, requests).await
        }
    }
}

async fn drive<R>(
    repository: Arc<R>,
    llm: Arc<OpenAiCompatibleClient>,
    settings: &Settings,
    requests: Vec<CreateTaskRequest>,
) -> Result<(), RunError>
where
    R: TaskRepository + 'static,
{
    let queue = Arc::new(InMemoryWorkQueue::new());
    let dispatcher = Dispatcher::new(repository, Arc::clone(&queue), Arc::new(DefaultClock))
        .with_settings(settings.dispatcher_settings());

    let mut task_ids = Vec::with_capacity(requests.len());
    let chunk_size = settings.limits.max_batch_size.max(1);
    let mut pending = requests.into_iter().peekable();
    while pending.peek().is_some() {
        let chunk: Vec<CreateTaskRequest> = pending.by_ref().take(chunk_size).collect();
        let created = dispatcher.batch_create_tasks(chunk).await?;
        task_ids.extend(created.iter().map(|task| task.id()));
    }
    info!(count = task_ids.len(), "tasks submitted");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let invoke_timeout = Duration::from_secs(settings.worker.invoke_timeout_seconds.max(1));
    let mut workers: Vec<JoinHandle<Result<WorkerStats, ServiceError>>> = Vec::new();
    for index in 1..=settings.worker.concurrency.max(1) {
        let worker_id = WorkerId::new(format!("{}-{index}", settings.worker.id_prefix))?;
        let worker = Worker::new(dispatcher.clone(), Arc::clone(&llm), worker_id)
            .with_invoke_timeout(invoke_timeout);
        let source = Arc::clone(&queue);
        let shutdown = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            worker.run(source.as_ref(), shutdown).await
        }));
    }

    tokio::select! {
        settled = wait_until_terminal(&dispatcher, &task_ids) => settled?,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.map_err(RunError::Runtime)?;
            warn!("interrupted; stopping workers after in-flight tasks");
        }
    }
    // A closed receiver set only means every worker already stopped.
    let _sent = shutdown_tx.send(true);
    queue.close()?;

    let mut totals = WorkerStats::default();
    for handle in workers {
        let stats = handle.await??;
        totals.completed = totals.completed.saturating_add(stats.completed);
        totals.failed = totals.failed.saturating_add(stats.failed);
        totals.discarded = totals.discarded.saturating_add(stats.discarded);
    }
    info!(
        completed = totals.completed,
        failed = totals.failed,
        discarded = totals.discarded,
        "run finished"
    );
    report(&dispatcher, &task_ids).await
}

async fn wait_until_terminal<R>(
    dispatcher: &Dispatcher<R, InMemoryWorkQueue, DefaultClock>,
    task_ids: &[TaskId],
) -> Result<(), RunError>
where
    R: TaskRepository,
{
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        let mut open = 0_usize;
        for task_id in task_ids {
            if !dispatcher.get_task(*task_id).await?.status().is_terminal() {
                open += 1;
            }
        }
        if open == 0 {
            return Ok(());
        }
    }
}

async fn report<R>(
    dispatcher: &Dispatcher<R, InMemoryWorkQueue, DefaultClock>,
    task_ids: &[TaskId],
) -> Result<(), RunError>
where
    R: TaskRepository,
{
    for task_id in task_ids {
        let details = dispatcher.get_task_details(*task_id).await?;
        let task = &details.task;
        let duration_ms = details
            .latest_execution
            .as_ref()
            .and_then(|attempt| attempt.duration_ms());
        match task.status() {
            TaskStatus::Completed => info!(
                %task_id,
                name = task.name().as_str(),
                duration_ms,
                output = task.output().unwrap_or_default(),
                "task completed"
            ),
            status => warn!(
                %task_id,
                name = task.name().as_str(),
                %status,
                error = task.error_message().unwrap_or_default(),
                "task did not complete"
            ),
        }
    }
    Ok(())
}
