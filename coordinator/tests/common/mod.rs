//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tether_coordinator::{
    test_utils::{build_connected_transports, TestPeer},
    Coordinator, CoordinatorConfig, CoordinatorError, PeerId,
};
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn new_coordinator() -> Arc<Coordinator> {
    Arc::new(Coordinator::new(CoordinatorConfig::default()))
}

pub type ServeHandle = JoinHandle<Result<(), CoordinatorError>>;

pub async fn connect_agent(
    coordinator: &Arc<Coordinator>,
    agent_id: PeerId,
) -> (TestPeer, ServeHandle) {
    let (ours, theirs) = build_connected_transports();
    let serve = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.serve_agent(theirs, agent_id).await })
    };
    let peer = TestPeer::connect(ours, agent_id).await.unwrap();
    (peer, serve)
}

pub async fn connect_client(
    coordinator: &Arc<Coordinator>,
    client_id: PeerId,
    initial_agent_id: Option<PeerId>,
) -> (TestPeer, ServeHandle) {
    let (ours, theirs) = build_connected_transports();
    let serve = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .serve_client(theirs, client_id, initial_agent_id)
                .await
        })
    };
    let peer = TestPeer::connect(ours, client_id).await.unwrap();
    (peer, serve)
}

/// Polls `condition` until it holds, panicking after [`TIMEOUT`].
pub async fn wait_until<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Waits until the coordinator has the peer's node at `seq`.
pub async fn wait_for_node_seq(coordinator: &Coordinator, peer_id: PeerId, seq: u64) {
    wait_until(
        || {
            coordinator
                .node_of(peer_id)
                .map(|node| node.seq >= seq)
                .unwrap_or(false)
        },
        "a node announcement to become visible",
    )
    .await;
}

/// Waits until the agent's serve loop has registered it.
pub async fn wait_for_agent_registered(coordinator: &Coordinator, agent_id: PeerId) {
    wait_until(
        || {
            coordinator
                .debug_snapshot()
                .map(|snapshot| snapshot.agents.iter().any(|agent| agent.id == agent_id))
                .unwrap_or(false)
        },
        "the agent to be registered",
    )
    .await;
}

/// Waits until the agent has no subscribers left in the graph.
pub async fn wait_for_no_subscribers(coordinator: &Coordinator, agent_id: PeerId) {
    wait_until(
        || {
            coordinator
                .debug_snapshot()
                .map(|snapshot| {
                    snapshot
                        .agents
                        .iter()
                        .filter(|agent| agent.id == agent_id)
                        .all(|agent| agent.subscribers.is_empty())
                })
                .unwrap_or(false)
        },
        "the subscription edge to be removed",
    )
    .await;
}
