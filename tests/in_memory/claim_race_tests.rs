//! Concurrency tests for atomic claims and the cancellation race.

use super::helpers::{Stack, stack};
use conductor::task::{
    domain::{AttemptOutcome, ExecutionReport, TaskStatus, WorkerId},
    services::{
        ClaimOutcome, CompletionOutcome, CreateTaskRequest, ErrorCategory, ServiceResult,
    },
};
use eyre::{bail, ensure};
use rstest::rstest;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_claim_wins(stack: Stack) -> eyre::Result<()> {
    let task = stack
        .dispatcher
        .create_task(CreateTaskRequest::new("contended", "p"))
        .await?;
    let task_id = task.id();

    let mut handles = Vec::new();
    for index in 0..8 {
        let dispatcher = stack.dispatcher.clone();
        let worker = WorkerId::new(format!("racer-{index}"))?;
        handles.push(tokio::spawn(async move {
            dispatcher.claim_for_execution(task_id, &worker).await
        }));
    }
    let mut claimed = 0;
    for handle in handles {
        match handle.await?? {
            ClaimOutcome::Claimed(_) => claimed += 1,
            ClaimOutcome::AlreadyHandled {
                status: TaskStatus::Running,
            } => {}
            other => bail!("unexpected claim outcome {other:?}"),
        }
    }

    ensure!(claimed == 1, "expected one winner, got {claimed}");
    ensure!(stack.dispatcher.list_executions(task.id()).await?.len() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_complete_agree_on_a_single_winner(stack: Stack) -> eyre::Result<()> {
    for round in 0..20 {
        let task = stack
            .dispatcher
            .create_task(CreateTaskRequest::new(format!("race {round}"), "p"))
            .await?;
        let worker = WorkerId::new("racer")?;
        let ClaimOutcome::Claimed(claimed) = stack
            .dispatcher
            .claim_for_execution(task.id(), &worker)
            .await?
        else {
            bail!("fresh task must be claimable");
        };
        let attempt_id = claimed.attempt.id();

        let task_id = task.id();
        let canceller = stack.dispatcher.clone();
        let completer = stack.dispatcher.clone();
        let cancel = tokio::spawn(async move { canceller.cancel_task(task_id).await });
        let complete = tokio::spawn(async move {
            completer
                .complete_execution(
                    task_id,
                    attempt_id,
                    ExecutionReport::new(AttemptOutcome::Completed {
                        output: "X".to_owned(),
                    }),
                )
                .await
        });
        let cancel_result = cancel.await?;
        let completion: ServiceResult<CompletionOutcome> = complete.await?;

        let stored = stack.dispatcher.get_task(task.id()).await?;
        match (stored.status(), completion?) {
            (TaskStatus::Cancelled, CompletionOutcome::Discarded { status }) => {
                ensure!(status == TaskStatus::Cancelled);
                ensure!(cancel_result.is_ok());
                ensure!(stored.output().is_none());
            }
            (TaskStatus::Completed, CompletionOutcome::Applied(_)) => {
                ensure!(
                    cancel_result.map_err(|err| err.category()).err()
                        == Some(ErrorCategory::FailedPrecondition)
                );
                ensure!(stored.output() == Some("X"));
            }
            (status, outcome) => bail!("inconsistent race result: {status} with {outcome:?}"),
        }
        let attempts = stack.dispatcher.list_executions(task.id()).await?;
        ensure!(attempts.iter().all(|attempt| attempt.is_completed()));
    }
    Ok(())
}
