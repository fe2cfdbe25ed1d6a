//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Multi-agent aggregator scenarios: fan-in over one relationship, batch
//! coalescing, close semantics, and the wire twin of the handle API.

mod common;

use std::time::Duration;

use common::*;
use tether_coordinator::{
    proto::{CoordMessage, PeerMessage},
    test_utils::{build_connected_transports, legacy_node, test_node, TestPeer},
    MultiAgentError, PeerUpdate,
};
use tether_test_utils::unpack_enum;
use uuid::Uuid;

#[tokio::test]
async fn fan_in_over_one_relationship() {
    init_logging();
    let coordinator = new_coordinator();
    let agent1_id = Uuid::new_v4();
    let agent2_id = Uuid::new_v4();

    let (mut agent1, agent1_serve) = connect_agent(&coordinator, agent1_id).await;
    let (mut agent2, _serve) = connect_agent(&coordinator, agent2_id).await;

    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();
    multi.subscribe_agent(agent1_id).unwrap();
    multi.subscribe_agent(agent2_id).unwrap();

    agent1.send(&PeerMessage::SelfUpdate(test_node(1))).await;
    let batch = multi.next_update().await.unwrap();
    assert_eq!(batch.len(), 1);
    unpack_enum!(PeerUpdate::Node { peer_id, node } = batch[0].clone());
    assert_eq!((peer_id, node.seq), (agent1_id, 1));

    agent2.send(&PeerMessage::SelfUpdate(test_node(7))).await;
    let batch = multi.next_update().await.unwrap();
    assert_eq!(batch.len(), 1);
    unpack_enum!(PeerUpdate::Node { peer_id, node } = batch[0].clone());
    assert_eq!((peer_id, node.seq), (agent2_id, 7));

    // A disconnecting agent surfaces as a gone-tagged entry.
    drop(agent1);
    agent1_serve.await.unwrap().unwrap();
    let batch = multi.next_update().await.unwrap();
    unpack_enum!(PeerUpdate::Gone { peer_id } = batch[0].clone());
    assert_eq!(peer_id, agent1_id);
}

#[tokio::test]
async fn resubscribe_replays_current_node() {
    init_logging();
    let coordinator = new_coordinator();
    let agent_id = Uuid::new_v4();

    let (mut agent, _serve) = connect_agent(&coordinator, agent_id).await;
    agent.send(&PeerMessage::SelfUpdate(test_node(7))).await;
    wait_for_node_seq(&coordinator, agent_id, 7).await;

    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();
    multi.subscribe_agent(agent_id).unwrap();
    let batch = multi.next_update().await.unwrap();
    unpack_enum!(PeerUpdate::Node { peer_id, node } = batch[0].clone());
    assert_eq!((peer_id, node.seq), (agent_id, 7));

    // Subscribing again is idempotent for the edge but replays the state.
    multi.subscribe_agent(agent_id).unwrap();
    let batch = multi.next_update().await.unwrap();
    unpack_enum!(PeerUpdate::Node { peer_id, node } = batch[0].clone());
    assert_eq!((peer_id, node.seq), (agent_id, 7));
}

#[tokio::test]
async fn update_self_reaches_subscribed_agents() {
    init_logging();
    let coordinator = new_coordinator();
    let agent_id = Uuid::new_v4();

    let (mut agent, _serve) = connect_agent(&coordinator, agent_id).await;
    wait_for_agent_registered(&coordinator, agent_id).await;
    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();
    multi.subscribe_agent(agent_id).unwrap();

    multi.update_self(test_node(1)).unwrap();
    let message = agent.recv_timeout(TIMEOUT).await.unwrap();
    unpack_enum!(CoordMessage::NodeUpdate { peer_id, node } = message);
    assert_eq!((peer_id, node.seq), (multi.id(), 1));
}

#[tokio::test]
async fn agent_is_legacy_inspects_the_primary_address() {
    init_logging();
    let coordinator = new_coordinator();
    let legacy_id = Uuid::new_v4();
    let modern_id = Uuid::new_v4();

    let (mut legacy_agent, _serve) = connect_agent(&coordinator, legacy_id).await;
    let (mut modern_agent, _serve) = connect_agent(&coordinator, modern_id).await;
    legacy_agent
        .send(&PeerMessage::SelfUpdate(legacy_node(1)))
        .await;
    modern_agent
        .send(&PeerMessage::SelfUpdate(test_node(1)))
        .await;
    wait_for_node_seq(&coordinator, legacy_id, 1).await;
    wait_for_node_seq(&coordinator, modern_id, 1).await;

    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();
    assert!(multi.agent_is_legacy(legacy_id));
    assert!(!multi.agent_is_legacy(modern_id));
    assert!(!multi.agent_is_legacy(Uuid::new_v4()));
}

#[tokio::test]
async fn close_drains_the_queue_then_fails_operations() {
    init_logging();
    let coordinator = new_coordinator();
    let agent_id = Uuid::new_v4();

    let (mut agent, _serve) = connect_agent(&coordinator, agent_id).await;
    agent.send(&PeerMessage::SelfUpdate(test_node(2))).await;
    wait_for_node_seq(&coordinator, agent_id, 2).await;

    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();
    multi.subscribe_agent(agent_id).unwrap();
    // The subscribe snapshot is queued but deliberately not pulled yet.

    multi.close().unwrap();
    assert!(multi.is_closed());
    let err = multi.close().unwrap_err();
    unpack_enum!(MultiAgentError::Closed = err);

    // Already-queued updates drain, then the closed marker surfaces once.
    let batch = multi.next_update().await.unwrap();
    unpack_enum!(PeerUpdate::Node { peer_id, node } = batch[0].clone());
    assert_eq!((peer_id, node.seq), (agent_id, 2));
    assert!(multi.next_update().await.is_none());
    assert!(multi.next_update().await.is_none());

    let err = multi.subscribe_agent(agent_id).unwrap_err();
    unpack_enum!(MultiAgentError::Closed = err);
    let err = multi.unsubscribe_agent(agent_id).unwrap_err();
    unpack_enum!(MultiAgentError::Closed = err);
    let err = multi.update_self(test_node(3)).unwrap_err();
    unpack_enum!(MultiAgentError::Closed = err);
}

#[tokio::test]
async fn unsubscribe_stops_fan_in() {
    init_logging();
    let coordinator = new_coordinator();
    let agent_id = Uuid::new_v4();

    let (mut agent, _serve) = connect_agent(&coordinator, agent_id).await;
    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();
    multi.subscribe_agent(agent_id).unwrap();
    multi.unsubscribe_agent(agent_id).unwrap();
    multi.unsubscribe_agent(agent_id).unwrap();
    wait_for_no_subscribers(&coordinator, agent_id).await;

    agent.send(&PeerMessage::SelfUpdate(test_node(1))).await;
    wait_for_node_seq(&coordinator, agent_id, 1).await;
    let quiet = tokio::time::timeout(Duration::from_millis(200), multi.next_update()).await;
    assert!(quiet.is_err(), "expected no fan-in after unsubscribe");
}

#[tokio::test]
async fn coordinator_shutdown_closes_handles() {
    init_logging();
    let coordinator = new_coordinator();
    let multi = coordinator.serve_multi_agent(Uuid::new_v4()).unwrap();

    coordinator.shutdown().await;
    assert!(multi.is_closed());
    assert!(multi.next_update().await.is_none());
    let err = multi.subscribe_agent(Uuid::new_v4()).unwrap_err();
    unpack_enum!(MultiAgentError::Closed = err);

    // New handles are refused after shutdown.
    assert!(coordinator.serve_multi_agent(Uuid::new_v4()).is_err());
}

#[tokio::test]
async fn the_wire_twin_speaks_tagged_updates() {
    init_logging();
    let coordinator = new_coordinator();
    let agent_id = Uuid::new_v4();
    let proxy_id = Uuid::new_v4();

    let (mut agent, agent_serve) = connect_agent(&coordinator, agent_id).await;

    let (ours, theirs) = build_connected_transports();
    let serve_coordinator = coordinator.clone();
    tokio::spawn(async move {
        let _ = serve_coordinator
            .serve_multi_agent_stream(theirs, proxy_id)
            .await;
    });
    let mut proxy = TestPeer::connect(ours, proxy_id).await.unwrap();

    proxy.send(&PeerMessage::Subscribe(agent_id)).await;
    agent.send(&PeerMessage::SelfUpdate(test_node(4))).await;

    let expected_agent = agent_id;
    let message = proxy.recv_timeout(TIMEOUT).await.unwrap();
    unpack_enum!(CoordMessage::MultiAgentUpdate { agent_id, node } = message);
    assert_eq!(agent_id, expected_agent);
    assert_eq!(node.unwrap().seq, 4);

    drop(agent);
    agent_serve.await.unwrap().unwrap();
    let message = proxy.recv_timeout(TIMEOUT).await.unwrap();
    unpack_enum!(CoordMessage::MultiAgentUpdate { agent_id, node } = message);
    assert_eq!(agent_id, expected_agent);
    assert!(node.is_none());
}
