//! Lineage writes under concurrent sibling creation.

use super::helpers::{Stack, stack};
use conductor::task::{
    domain::TaskId,
    ports::LineageRepository,
    services::CreateTaskRequest,
};
use eyre::{OptionExt, ensure};
use rstest::rstest;

const SIBLINGS: usize = 16;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_siblings_share_one_chain(stack: Stack) -> eyre::Result<()> {
    let root = stack
        .dispatcher
        .create_task(CreateTaskRequest::new("root", "p"))
        .await?;

    let mut handles = Vec::with_capacity(SIBLINGS);
    for index in 0..SIBLINGS {
        let dispatcher = stack.dispatcher.clone();
        let request = CreateTaskRequest::new(format!("sibling {index}"), "c").with_parent(root.id());
        handles.push(tokio::spawn(async move { dispatcher.create_task(request).await }));
    }
    let mut children: Vec<TaskId> = Vec::with_capacity(SIBLINGS);
    for handle in handles {
        children.push(handle.await??.id());
    }

    let chain = stack
        .repository
        .chain_containing(root.id())
        .await?
        .ok_or_eyre("root must own a chain")?;
    ensure!(chain.root_task_id() == root.id());
    ensure!(stack.repository.child_edges(root.id()).await?.len() == SIBLINGS);
    ensure!(stack.repository.chain_edges(chain.id()).await?.len() == SIBLINGS);

    for child_id in children {
        let child = stack.dispatcher.get_task(child_id).await?;
        let edge = stack
            .repository
            .parent_edge(child_id)
            .await?
            .ok_or_eyre("every sibling has a parent edge")?;
        let child_chain = stack
            .repository
            .chain_containing(child_id)
            .await?
            .ok_or_eyre("every sibling belongs to a chain")?;
        ensure!(child.parent_task_id() == Some(edge.parent_task_id()));
        ensure!(edge.chain_id() == chain.id());
        ensure!(child_chain.id() == chain.id());
        ensure!(child.chain_position() == Some(1));
    }
    Ok(())
}
