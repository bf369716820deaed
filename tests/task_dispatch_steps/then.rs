//! Then steps for task dispatch BDD scenarios.

use super::world::{DispatchWorld, run_async};
use conductor::task::{domain::TaskStatus, services::CompletionOutcome};
use rstest_bdd_macros::then;

fn parse_status(raw: &str) -> Result<TaskStatus, eyre::Report> {
    TaskStatus::try_from(raw).map_err(|err| eyre::eyre!("invalid expected status in scenario: {err}"))
}

#[then(r#"the task status is "{status}""#)]
fn task_status_is(world: &DispatchWorld, status: String) -> Result<(), eyre::Report> {
    let expected = parse_status(&status)?;
    let task = world.current_task()?;
    eyre::ensure!(
        task.status() == expected,
        "expected status {expected}, found {}",
        task.status()
    );
    Ok(())
}

#[then(r#"the task output is "{output}""#)]
fn task_output_is(world: &DispatchWorld, output: String) -> Result<(), eyre::Report> {
    let task = world.current_task()?;
    eyre::ensure!(
        task.output() == Some(output.as_str()),
        "expected output {output:?}, found {:?}",
        task.output()
    );
    Ok(())
}

#[then("the task has no output")]
fn task_has_no_output(world: &DispatchWorld) -> Result<(), eyre::Report> {
    let task = world.current_task()?;
    eyre::ensure!(task.output().is_none(), "unexpected output {:?}", task.output());
    Ok(())
}

#[then("the completion is discarded")]
fn completion_discarded(world: &DispatchWorld) -> Result<(), eyre::Report> {
    let outcome = world
        .completion
        .as_ref()
        .ok_or_else(|| eyre::eyre!("missing completion outcome"))?;
    eyre::ensure!(
        matches!(outcome, CompletionOutcome::Discarded { .. }),
        "expected a discarded completion, got {outcome:?}"
    );
    Ok(())
}

#[then("{count:usize} batch tasks exist")]
fn batch_count(world: &DispatchWorld, count: usize) -> Result<(), eyre::Report> {
    eyre::ensure!(
        world.batch.len() == count,
        "expected {count} batch tasks, found {}",
        world.batch.len()
    );
    Ok(())
}

#[then(r#"batch task {index:usize} is named "{name}""#)]
fn batch_task_named(world: &DispatchWorld, index: usize, name: String) -> Result<(), eyre::Report> {
    let task = index
        .checked_sub(1)
        .and_then(|position| world.batch.get(position))
        .ok_or_else(|| eyre::eyre!("no batch task at position {index}"))?;
    eyre::ensure!(
        task.name().as_str() == name,
        "expected name {name:?}, found {:?}",
        task.name().as_str()
    );
    Ok(())
}

#[then(r#"every batch task is "{status}""#)]
fn every_batch_task_is(world: &DispatchWorld, status: String) -> Result<(), eyre::Report> {
    let expected = parse_status(&status)?;
    for task in &world.batch {
        let stored = run_async(world.dispatcher.get_task(task.id()))?;
        eyre::ensure!(
            stored.status() == expected,
            "task {} is {}, expected {expected}",
            stored.name().as_str(),
            stored.status()
        );
    }
    Ok(())
}
