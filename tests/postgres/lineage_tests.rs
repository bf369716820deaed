//! Chain and edge writes against `PostgreSQL`, including concurrent
//! sibling creation and task deletion.

use super::helpers::{TestDatabase, dispatcher_over, test_runtime};
use conductor::task::{
    domain::{LineageDepth, Task, TaskId},
    ports::LineageRepository,
    services::{CreateTaskRequest, LineageService},
};
use diesel::prelude::*;
use diesel::sql_types::Uuid as SqlUuid;
use pg_embedded_setup_unpriv::{TestCluster, test_support::shared_test_cluster};
use rstest::rstest;

const SIBLINGS: usize = 12;

fn delete_task(db: &TestDatabase, task_id: TaskId) -> QueryResult<usize> {
    let mut conn = db.connect().expect("direct connection");
    diesel::sql_query("DELETE FROM tasks WHERE id = $1")
        .bind::<SqlUuid, _>(task_id.into_inner())
        .execute(&mut conn)
}

#[rstest]
fn concurrent_siblings_share_one_chain(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "siblings").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();

    let root = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("root", "p")))
        .expect("create root");
    let root_id = root.id();
    let children: Vec<Task> = rt.block_on(async {
        let mut handles = Vec::with_capacity(SIBLINGS);
        for index in 0..SIBLINGS {
            let creator = dispatcher.clone();
            let request =
                CreateTaskRequest::new(format!("sibling {index}"), "c").with_parent(root_id);
            handles.push(tokio::spawn(async move { creator.create_task(request).await }));
        }
        let mut children = Vec::with_capacity(SIBLINGS);
        for handle in handles {
            children.push(
                handle
                    .await
                    .expect("create task joins")
                    .expect("sibling is created"),
            );
        }
        children
    });

    let chain = rt
        .block_on(repository.chain_containing(root_id))
        .expect("chain lookup")
        .expect("root owns a chain");
    assert_eq!(chain.root_task_id(), root_id);
    let edges = rt
        .block_on(repository.chain_edges(chain.id()))
        .expect("chain edges");
    assert_eq!(edges.len(), SIBLINGS);
    assert_eq!(
        rt.block_on(repository.child_edges(root_id))
            .expect("child edges")
            .len(),
        SIBLINGS
    );
    for child in &children {
        let edge = rt
            .block_on(repository.parent_edge(child.id()))
            .expect("parent edge lookup")
            .expect("every sibling has an edge");
        let stored = rt
            .block_on(dispatcher.get_task(child.id()))
            .expect("sibling exists");
        assert_eq!(stored.parent_task_id(), Some(edge.parent_task_id()));
        assert_eq!(edge.chain_id(), chain.id());
        assert_eq!(stored.chain_position(), Some(1));
    }
}

#[rstest]
fn ancestors_follow_stored_edges(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "ancestors").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let lineage = LineageService::new(repository.clone());
    let rt = test_runtime();

    let first = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T1", "p")))
        .expect("create T1");
    let second = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T2", "p").with_parent(first.id())))
        .expect("create T2");
    let third = rt
        .block_on(
            dispatcher.create_task(CreateTaskRequest::new("T3", "p").with_parent(second.id())),
        )
        .expect("create T3");

    let ancestors = rt
        .block_on(lineage.ancestors(third.id(), LineageDepth::default()))
        .expect("ancestors");
    let found: Vec<(TaskId, u32)> = ancestors
        .iter()
        .map(|node| (node.task.id(), node.depth))
        .collect();
    assert_eq!(found, vec![(second.id(), 1), (first.id(), 2)]);
    assert_eq!(third.chain_position(), Some(2));
}

#[rstest]
fn deleting_a_root_with_deeper_edges_is_refused(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "delete_root").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();

    let first = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T1", "p")))
        .expect("create T1");
    let second = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T2", "p").with_parent(first.id())))
        .expect("create T2");
    let third = rt
        .block_on(
            dispatcher.create_task(CreateTaskRequest::new("T3", "p").with_parent(second.id())),
        )
        .expect("create T3");

    let refused = delete_task(&db, first.id());

    assert!(refused.is_err(), "root delete must not orphan the T2 -> T3 edge");
    let edge = rt
        .block_on(repository.parent_edge(third.id()))
        .expect("parent edge lookup")
        .expect("T2 -> T3 edge survives");
    let stored = rt
        .block_on(dispatcher.get_task(third.id()))
        .expect("T3 exists");
    assert_eq!(stored.parent_task_id(), Some(edge.parent_task_id()));
}

#[rstest]
fn deleting_a_task_removes_only_its_edges(shared_test_cluster: &'static TestCluster) {
    let db = TestDatabase::create(shared_test_cluster, "delete_leaf").expect("database setup");
    let repository = db.repository().expect("repository setup");
    let dispatcher = dispatcher_over(&repository);
    let rt = test_runtime();

    let first = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T1", "p")))
        .expect("create T1");
    let second = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T2", "p").with_parent(first.id())))
        .expect("create T2");
    let sibling = rt
        .block_on(dispatcher.create_task(CreateTaskRequest::new("T2b", "p").with_parent(first.id())))
        .expect("create T2b");

    let deleted = delete_task(&db, second.id()).expect("leaf delete succeeds");

    assert_eq!(deleted, 1);
    assert!(
        rt.block_on(repository.parent_edge(second.id()))
            .expect("parent edge lookup")
            .is_none()
    );
    let remaining = rt
        .block_on(repository.child_edges(first.id()))
        .expect("child edges");
    assert_eq!(remaining.len(), 1);
    assert!(
        remaining
            .first()
            .is_some_and(|edge| edge.child_task_id() == sibling.id())
    );
    let chain = rt
        .block_on(repository.chain_containing(first.id()))
        .expect("chain lookup");
    assert!(chain.is_some(), "the root's chain stays while T2b is attached");
}
