//! When steps for task dispatch BDD scenarios.

use super::world::{DispatchWorld, run_async};
use conductor::task::{
    domain::{AttemptOutcome, ExecutionReport, WorkerId},
    services::{ClaimOutcome, CreateTaskRequest, ServiceError, batch_requests_from_lines},
};
use eyre::WrapErr;
use rstest_bdd_macros::when;

#[when(r#"a task "{name}" with prompt "{prompt}" is created"#)]
fn create_task(
    world: &mut DispatchWorld,
    name: String,
    prompt: String,
) -> Result<(), eyre::Report> {
    match run_async(
        world
            .dispatcher
            .create_task(CreateTaskRequest::new(name, prompt)),
    ) {
        Ok(task) => world.task_id = Some(task.id()),
        Err(ServiceError::Unavailable { task_ids, .. }) => {
            world.task_id = task_ids.first().copied();
        }
        Err(err) => return Err(err).wrap_err("create task in scenario"),
    }
    Ok(())
}

#[when("a worker claims the task")]
fn claim_task(world: &mut DispatchWorld) -> Result<(), eyre::Report> {
    let task_id = world.task_id()?;
    let worker = WorkerId::new("bdd-worker")?;
    let outcome = run_async(world.dispatcher.claim_for_execution(task_id, &worker))
        .wrap_err("claim task in scenario")?;
    let ClaimOutcome::Claimed(claimed) = outcome else {
        return Err(eyre::eyre!("expected a claim, got {outcome:?}"));
    };
    world.attempt_id = Some(claimed.attempt.id());
    Ok(())
}

#[when(r#"the worker completes the task with output "{output}""#)]
fn complete_task(world: &mut DispatchWorld, output: String) -> Result<(), eyre::Report> {
    let task_id = world.task_id()?;
    let attempt_id = world
        .attempt_id
        .ok_or_else(|| eyre::eyre!("missing claimed attempt in scenario world"))?;
    let outcome = run_async(world.dispatcher.complete_execution(
        task_id,
        attempt_id,
        ExecutionReport::new(AttemptOutcome::Completed { output }),
    ))
    .wrap_err("complete task in scenario")?;
    world.completion = Some(outcome);
    Ok(())
}

#[when("the task is cancelled")]
fn cancel_task(world: &mut DispatchWorld) -> Result<(), eyre::Report> {
    let task_id = world.task_id()?;
    run_async(world.dispatcher.cancel_task(task_id)).wrap_err("cancel task in scenario")?;
    Ok(())
}

#[when("{count:usize} prompt lines are batch-submitted")]
fn batch_submit(world: &mut DispatchWorld, count: usize) -> Result<(), eyre::Report> {
    let lines: String = (1..=count).map(|n| format!("prompt line {n}\n")).collect();
    world.batch = run_async(
        world
            .dispatcher
            .batch_create_tasks(batch_requests_from_lines(&lines)),
    )
    .wrap_err("batch-submit prompt lines in scenario")?;
    Ok(())
}
