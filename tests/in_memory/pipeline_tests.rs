//! End-to-end drains of submitted work through a worker pool.

use super::helpers::{EchoLlm, Stack, drain_with_pool, stack};
use conductor::task::{
    domain::{OutputMapping, Priority, TaskId, TaskListQuery, TaskStatus, WorkerId},
    services::{CreateTaskRequest, Worker, batch_requests_from_lines},
};
use chrono::Utc;
use eyre::ensure;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_completes_every_batch_task_once(stack: Stack) -> eyre::Result<()> {
    let lines: String = (1..=10).map(|n| format!("prompt {n}\n")).collect();
    let tasks = stack
        .dispatcher
        .batch_create_tasks(batch_requests_from_lines(&lines))
        .await?;
    let llm = Arc::new(EchoLlm::default());

    let stats = drain_with_pool(&stack, Arc::clone(&llm), 3).await?;

    let completed: u64 = stats.iter().map(|worker| worker.completed).sum();
    ensure!(completed == 10);
    ensure!(llm.seen().len() == 10);
    for task in &tasks {
        let stored = stack.dispatcher.get_task(task.id()).await?;
        ensure!(stored.status() == TaskStatus::Completed);
        let expected = format!("echo: {}", task.prompt().as_str());
        ensure!(stored.output() == Some(expected.as_str()));
        ensure!(stack.dispatcher.list_executions(task.id()).await?.len() == 1);
    }
    let page = stack
        .dispatcher
        .list_tasks(&TaskListQuery::default().with_status(Some(TaskStatus::Completed)))
        .await?;
    ensure!(page.total_count == 10);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn single_worker_takes_highest_priority_first(stack: Stack) -> eyre::Result<()> {
    for (prompt, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("critical", Priority::Critical),
        ("high", Priority::High),
    ] {
        stack
            .dispatcher
            .create_task(CreateTaskRequest::new(prompt, prompt).with_priority(priority))
            .await?;
    }
    let llm = Arc::new(EchoLlm::default());

    drain_with_pool(&stack, Arc::clone(&llm), 1).await?;

    ensure!(llm.seen() == ["critical", "high", "normal", "low"]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn child_prompt_carries_completed_parent_output(stack: Stack) -> eyre::Result<()> {
    let parent = stack
        .dispatcher
        .create_task(CreateTaskRequest::new("research", "collect facts"))
        .await?;
    let llm = Arc::new(EchoLlm::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(
        stack.dispatcher.clone(),
        Arc::clone(&llm),
        WorkerId::new("solo")?,
    );
    let queue = Arc::clone(&stack.queue);
    let running = tokio::spawn(async move { worker.run(queue.as_ref(), shutdown_rx).await });
    let done = wait_for_status(&stack, parent.id(), TaskStatus::Completed).await?;
    ensure!(done);

    let child = stack
        .dispatcher
        .create_task(
            CreateTaskRequest::new("summary", "Summarise")
                .with_parent(parent.id())
                .with_output_mapping(OutputMapping::PrependParentOutput),
        )
        .await?;
    stack.queue.close()?;
    running.await??;

    ensure!(
        child.prompt().as_str() == "Previous task output: echo: collect facts\n\nSummarise"
    );
    ensure!(child.chain_position() == Some(1));
    ensure!(stack.dispatcher.get_task(child.id()).await?.status() == TaskStatus::Completed);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deferred_task_survives_worker_shutdown(stack: Stack) -> eyre::Result<()> {
    let due = Utc::now() + chrono::Duration::milliseconds(300);
    let task = stack
        .dispatcher
        .create_task(CreateTaskRequest::new("later", "wait for it").with_execute_after(due))
        .await?;
    let llm = Arc::new(EchoLlm::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Worker::new(
        stack.dispatcher.clone(),
        Arc::clone(&llm),
        WorkerId::new("early")?,
    );
    let queue = Arc::clone(&stack.queue);
    let running = tokio::spawn(async move { worker.run(queue.as_ref(), shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true)?;
    running.await??;
    stack.queue.close()?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    ensure!(stack.dispatcher.get_task(task.id()).await?.status() == TaskStatus::Queued);
    ensure!(stack.queue.ready_len()? == 1);
    ensure!(stack.queue.in_flight_len()? == 0);
    ensure!(llm.seen().is_empty());

    let stats = drain_with_pool(&stack, Arc::clone(&llm), 1).await?;

    ensure!(stats.iter().map(|worker| worker.completed).sum::<u64>() == 1);
    ensure!(stack.dispatcher.get_task(task.id()).await?.status() == TaskStatus::Completed);
    Ok(())
}

async fn wait_for_status(
    stack: &Stack,
    task_id: TaskId,
    status: TaskStatus,
) -> eyre::Result<bool> {
    for _ in 0..200 {
        if stack.dispatcher.get_task(task_id).await?.status() == status {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(false)
}
