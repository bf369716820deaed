//! Row mapping, conditional writes, atomic claims, and outcome recording
//! against `PostgreSQL`.

use super::helpers::{TestDatabase, dispatcher_over, test_runtime};
use conductor::task::{
    domain::{
        AttemptOutcome, CreatedBy, ExecutionReport, Priority, TaskStatus, TokenUsage, WorkerId,
    },
    ports::{TaskRepository, TaskRepositoryError},
    services::{ClaimOutcome, CompletionOutcome, CreateTaskRequest},
};
use mockable::DefaultClock;
use pg_embedded_setup_unpriv::{TestCluster, test_support::shared_test_cluster};
use rstest::rstest;
use serde_json::{Map, json};

fn completed(output: &str) -> ExecutionReport {
    ExecutionReport::new(AttemptOutcome::Completed {
        output: output.to_owned(),
    })
}

#[rstest]
fn stored_task_reads_back_field_for_field(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "round_trip").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();

    let mut metadata = Map::new();
    metadata.insert("source".to_owned(), json!("nightly"));
    let created = rt
        .block_on(
            dispatcher.create_task(
                CreateTaskRequest::new("Summarise", "Summarise the report")
                    .with_priority(Priority::Critical)
                    .with_created_by("ops")
                    .with_max_retries(5)
                    .with_metadata(metadata.clone()),
            ),
        )
        .expect("create task");

    let stored = rt
        .block_on(repository.find_by_id(created.id()))
        .expect("find_by_id")
        .expect("task exists");

    assert_eq!(stored.name(), created.name());
    assert_eq!(stored.prompt(), created.prompt());
    assert_eq!(stored.status(), TaskStatus::Queued);
    assert_eq!(stored.priority(), Priority::Critical);
    assert_eq!(stored.max_retries(), 5);
    assert_eq!(stored.retry_count(), 0);
    assert_eq!(stored.created_by().map(CreatedBy::as_str), Some("ops"));
    assert_eq!(stored.metadata(), &metadata);
    assert_eq!(stored.parent_task_id(), None);
    assert_eq!(stored.chain_position(), None);
}

#[rstest]
fn stale_status_write_is_refused(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "stale_write").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();

    let task = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("cas", "p")))
        .expect("create task");
    let mut cancelled = task.clone();
    cancelled.cancel(&DefaultClock).expect("queued task cancels");

    let stale = rt
        .block_on(repository.update_if_status(&cancelled, TaskStatus::Pending))
        .expect("conditional update");
    let fresh = rt
        .block_on(repository.update_if_status(&cancelled, TaskStatus::Queued))
        .expect("conditional update");

    assert!(!stale, "write keyed on an old status must not apply");
    assert!(fresh);
    let stored = rt
        .block_on(dispatcher.get_task(task.id()))
        .expect("task exists");
    assert_eq!(stored.status(), TaskStatus::Cancelled);
}

#[rstest]
fn exactly_one_concurrent_claim_wins(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "claim_race").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();

    let task = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("contended", "p")))
        .expect("create task");

    let task_id = task.id();
    let outcomes = rt.block_on(async {
        let mut handles = Vec::new();
        for index in 0..8 {
            let racer = dispatcher.clone();
            let worker = WorkerId::new(format!("racer-{index}")).expect("valid worker id");
            handles.push(tokio::spawn(async move {
                racer.claim_for_execution(task_id, &worker).await
            }));
        }
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.expect("claim task joins"));
        }
        outcomes
    });

    let mut claimed = 0;
    for outcome in outcomes {
        match outcome.expect("claim does not error") {
            ClaimOutcome::Claimed(_) => claimed += 1,
            ClaimOutcome::AlreadyHandled {
                status: TaskStatus::Running,
            } => {}
            other => panic!("unexpected claim outcome {other:?}"),
        }
    }
    assert_eq!(claimed, 1);
    let attempts = rt
        .block_on(dispatcher.list_executions(task.id()))
        .expect("list attempts");
    assert_eq!(attempts.len(), 1);
    assert_eq!(
        rt.block_on(dispatcher.get_task(task.id()))
            .expect("task exists")
            .status(),
        TaskStatus::Running
    );
}

#[rstest]
fn completion_after_cancel_closes_attempt_only(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "late_result").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();
    let worker = WorkerId::new("late-worker").expect("valid worker id");

    let task = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("cancel me", "p")))
        .expect("create task");
    let ClaimOutcome::Claimed(claimed) = rt
        .block_on(dispatcher.claim_for_execution(task.id(), &worker))
        .expect("claim")
    else {
        panic!("fresh task must be claimable");
    };
    rt.block_on(dispatcher.cancel_task(task.id()))
        .expect("running task cancels");

    let outcome = rt
        .block_on(dispatcher.complete_execution(
            task.id(),
            claimed.attempt.id(),
            completed("too late").with_token_usage(Some(TokenUsage::new(3, 4, 7))),
        ))
        .expect("completion is recorded");

    assert_eq!(
        outcome,
        CompletionOutcome::Discarded {
            status: TaskStatus::Cancelled
        }
    );
    let stored = rt
        .block_on(dispatcher.get_task(task.id()))
        .expect("task exists");
    assert_eq!(stored.status(), TaskStatus::Cancelled);
    assert_eq!(stored.output(), None);
    let attempt = rt
        .block_on(repository.find_attempt(claimed.attempt.id()))
        .expect("find attempt")
        .expect("attempt exists");
    assert_eq!(attempt.output(), Some("too late"));
    assert_eq!(attempt.token_usage(), Some(TokenUsage::new(3, 4, 7)));
    assert!(attempt.completed_at().is_some());
}

#[rstest]
fn recorded_attempt_cannot_be_recorded_again(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "attempt_once").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();
    let worker = WorkerId::new("once").expect("valid worker id");

    let task = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("once", "p")))
        .expect("create task");
    let ClaimOutcome::Claimed(claimed) = rt
        .block_on(dispatcher.claim_for_execution(task.id(), &worker))
        .expect("claim")
    else {
        panic!("fresh task must be claimable");
    };
    let mut finished = claimed.attempt.clone();
    finished
        .finish(completed("first"), &DefaultClock)
        .expect("open attempt finishes");
    let applied = rt
        .block_on(repository.record_outcome(&finished, None))
        .expect("first outcome is recorded");

    let second = rt.block_on(repository.record_outcome(&finished, None));

    assert!(!applied, "no task row was offered");
    assert!(
        matches!(second, Err(TaskRepositoryError::AttemptAlreadyRecorded(id)) if id == finished.id()),
        "expected AttemptAlreadyRecorded, got {second:?}"
    );
    assert_eq!(
        rt.block_on(dispatcher.get_task(task.id()))
            .expect("task exists")
            .status(),
        TaskStatus::Running
    );
}
