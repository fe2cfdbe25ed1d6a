//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Coordinator state: the peer registry, the subscription graph and the
//! fan-out engine, mutated as a unit under one lock.
//!
//! None of these operations perform I/O. Fan-out only enqueues onto peer
//! send queues; the per-peer send loops take over from there.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use log::*;
use serde::Serialize;

use crate::{
    config::CoordinatorConfig,
    coordinator::error::CoordinatorError,
    node::{Node, PeerId},
    queue::SendQueue,
};

const LOG_TARGET: &str = "tether::coordinator::core";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerKind {
    Agent,
    Client,
    MultiAgent,
}

pub(crate) struct PeerEntry {
    pub kind: PeerKind,
    pub node: Option<Node>,
    /// Agent ids this peer is interested in. Always empty for agents.
    pub subscriptions: BTreeSet<PeerId>,
    pub queue: Arc<SendQueue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateOutcome {
    Applied,
    /// The update's sequence number did not advance; it was dropped.
    Stale,
    UnknownPeer,
}

pub(crate) struct Core {
    peers: HashMap<PeerId, PeerEntry>,
    /// Interest edges keyed by agent id. An entry outlives the agent's
    /// registry record so that a returning agent resumes fan-out without its
    /// subscribers re-subscribing; it is dropped once the last subscriber
    /// unsubscribes or disconnects.
    agent_subscribers: HashMap<PeerId, BTreeSet<PeerId>>,
    queue_capacity: usize,
}

impl Core {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            peers: HashMap::new(),
            agent_subscribers: HashMap::new(),
            queue_capacity: config.queue_capacity,
        }
    }

    pub fn register(
        &mut self,
        peer_id: PeerId,
        kind: PeerKind,
    ) -> Result<Arc<SendQueue>, CoordinatorError> {
        if self.peers.contains_key(&peer_id) {
            return Err(CoordinatorError::DuplicatePeer(peer_id));
        }
        let queue = Arc::new(SendQueue::new(self.queue_capacity));
        self.peers.insert(
            peer_id,
            PeerEntry {
                kind,
                node: None,
                subscriptions: BTreeSet::new(),
                queue: queue.clone(),
            },
        );
        debug!(target: LOG_TARGET, "Registered {:?} peer '{}'", kind, peer_id);
        Ok(queue)
    }

    /// Removes a peer, purges the edges it owned, notifies its observers and
    /// closes its queue. Idempotent; returns whether the peer was present.
    pub fn remove(&mut self, peer_id: PeerId) -> bool {
        let Some(entry) = self.peers.remove(&peer_id) else {
            return false;
        };
        match entry.kind {
            PeerKind::Agent => {
                if let Some(subscribers) = self.agent_subscribers.get(&peer_id) {
                    for subscriber_id in subscribers {
                        if let Some(subscriber) = self.peers.get(subscriber_id) {
                            subscriber.queue.push_gone(peer_id);
                        }
                    }
                }
            },
            PeerKind::Client | PeerKind::MultiAgent => {
                for agent_id in &entry.subscriptions {
                    let now_empty = match self.agent_subscribers.get_mut(agent_id) {
                        Some(subscribers) => {
                            subscribers.remove(&peer_id);
                            subscribers.is_empty()
                        },
                        None => false,
                    };
                    if now_empty {
                        self.agent_subscribers.remove(agent_id);
                    }
                    if let Some(agent) = self.peers.get(agent_id) {
                        if agent.kind == PeerKind::Agent {
                            agent.queue.push_gone(peer_id);
                        }
                    }
                }
            },
        }
        entry.queue.close();
        debug!(target: LOG_TARGET, "Unregistered {:?} peer '{}'", entry.kind, peer_id);
        true
    }

    /// Replaces the peer's announced node and fans the change out to every
    /// peer that observes it. Updates whose sequence number does not advance
    /// are dropped without fan-out.
    pub fn update_node(&mut self, peer_id: PeerId, node: Node) -> UpdateOutcome {
        let kind = {
            let Some(entry) = self.peers.get_mut(&peer_id) else {
                return UpdateOutcome::UnknownPeer;
            };
            if let Some(prev) = &entry.node {
                if node.seq <= prev.seq {
                    debug!(
                        target: LOG_TARGET,
                        "Ignoring stale node update from '{}' (seq {} <= {})",
                        peer_id,
                        node.seq,
                        prev.seq
                    );
                    return UpdateOutcome::Stale;
                }
            }
            entry.node = Some(node.clone());
            entry.kind
        };
        self.fan_out(peer_id, kind, &node);
        UpdateOutcome::Applied
    }

    fn fan_out(&self, source: PeerId, kind: PeerKind, node: &Node) {
        match kind {
            PeerKind::Agent => {
                // BTreeSet iteration gives a stable, sorted target order.
                if let Some(subscribers) = self.agent_subscribers.get(&source) {
                    for subscriber_id in subscribers {
                        if let Some(subscriber) = self.peers.get(subscriber_id) {
                            subscriber.queue.push_node(source, node.clone());
                        }
                    }
                }
            },
            // Agents need client nodes to reach clients, symmetrically.
            PeerKind::Client | PeerKind::MultiAgent => {
                let Some(entry) = self.peers.get(&source) else {
                    return;
                };
                for agent_id in &entry.subscriptions {
                    if let Some(agent) = self.peers.get(agent_id) {
                        if agent.kind == PeerKind::Agent {
                            agent.queue.push_node(source, node.clone());
                        }
                    }
                }
            },
        }
    }

    /// Inserts the interest edge (subscriber → agent). Idempotent. Every call
    /// replays the agent's current node into the subscriber's queue when
    /// there is one; subscribing to an agent the coordinator has never seen
    /// is accepted and becomes live once the agent announces.
    pub fn subscribe(
        &mut self,
        subscriber_id: PeerId,
        agent_id: PeerId,
    ) -> Result<(), CoordinatorError> {
        let queue = {
            let entry = self
                .peers
                .get_mut(&subscriber_id)
                .ok_or(CoordinatorError::UnknownPeer(subscriber_id))?;
            entry.subscriptions.insert(agent_id);
            entry.queue.clone()
        };
        self.agent_subscribers
            .entry(agent_id)
            .or_default()
            .insert(subscriber_id);
        if let Some(node) = self
            .peers
            .get(&agent_id)
            .filter(|agent| agent.kind == PeerKind::Agent)
            .and_then(|agent| agent.node.clone())
        {
            queue.push_node(agent_id, node);
        }
        Ok(())
    }

    /// Removes the interest edge. Idempotent; enqueues nothing.
    pub fn unsubscribe(
        &mut self,
        subscriber_id: PeerId,
        agent_id: PeerId,
    ) -> Result<(), CoordinatorError> {
        let entry = self
            .peers
            .get_mut(&subscriber_id)
            .ok_or(CoordinatorError::UnknownPeer(subscriber_id))?;
        entry.subscriptions.remove(&agent_id);
        let now_empty = match self.agent_subscribers.get_mut(&agent_id) {
            Some(subscribers) => {
                subscribers.remove(&subscriber_id);
                subscribers.is_empty()
            },
            None => false,
        };
        if now_empty {
            self.agent_subscribers.remove(&agent_id);
        }
        Ok(())
    }

    pub fn node_of(&self, peer_id: PeerId) -> Option<Node> {
        self.peers.get(&peer_id).and_then(|entry| entry.node.clone())
    }

    pub fn subscribers_of(&self, agent_id: PeerId) -> Vec<PeerId> {
        self.agent_subscribers
            .get(&agent_id)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriptions_of(&self, subscriber_id: PeerId) -> Vec<PeerId> {
        self.peers
            .get(&subscriber_id)
            .map(|entry| entry.subscriptions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops every peer and closes every queue. Used on shutdown, where
    /// notifying peers about each other is moot.
    pub fn clear(&mut self) {
        for (peer_id, entry) in self.peers.drain() {
            entry.queue.close();
            debug!(target: LOG_TARGET, "Dropped {:?} peer '{}' at shutdown", entry.kind, peer_id);
        }
        self.agent_subscribers.clear();
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let mut agents = Vec::new();
        let mut clients = Vec::new();
        for (peer_id, entry) in &self.peers {
            match entry.kind {
                PeerKind::Agent => agents.push(AgentSummary {
                    id: *peer_id,
                    has_node: entry.node.is_some(),
                    subscribers: self.subscribers_of(*peer_id),
                    queue_depth: entry.queue.len(),
                }),
                PeerKind::Client | PeerKind::MultiAgent => clients.push(ClientSummary {
                    id: *peer_id,
                    kind: match entry.kind {
                        PeerKind::MultiAgent => "multiagent",
                        _ => "client",
                    },
                    has_node: entry.node.is_some(),
                    subscriptions: self.subscriptions_of(*peer_id),
                    queue_depth: entry.queue.len(),
                }),
            }
        }
        agents.sort_by_key(|summary| summary.id);
        clients.sort_by_key(|summary| summary.id);
        DebugSnapshot { agents, clients }
    }
}

/// Read-only summary of coordinator state served by the debug endpoint.
#[derive(Debug, Serialize)]
pub struct DebugSnapshot {
    pub agents: Vec<AgentSummary>,
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Serialize)]
pub struct AgentSummary {
    pub id: PeerId,
    pub has_node: bool,
    pub subscribers: Vec<PeerId>,
    pub queue_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub id: PeerId,
    pub kind: &'static str,
    pub has_node: bool,
    pub subscriptions: Vec<PeerId>,
    pub queue_depth: usize,
}

/// The coordinator-wide lock over [`Core`].
#[derive(Clone)]
pub(crate) struct SharedCore {
    inner: Arc<Mutex<Core>>,
}

impl SharedCore {
    pub fn new(core: Core) -> Self {
        Self {
            inner: Arc::new(Mutex::new(core)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Core>, CoordinatorError> {
        self.inner.lock().map_err(|_| CoordinatorError::PoisonedLock)
    }
}

#[cfg(test)]
mod test {
    use tether_test_utils::unpack_enum;
    use uuid::Uuid;

    use super::*;
    use crate::queue::PeerUpdate;

    fn node(seq: u64) -> Node {
        Node {
            seq,
            key: format!("nodekey:{seq:02x}"),
            addresses: vec![],
            endpoints: vec![],
            preferred_derp: 1,
        }
    }

    fn new_core() -> Core {
        Core::new(&CoordinatorConfig::default())
    }

    #[test]
    fn register_rejects_duplicate_ids_across_kinds() {
        let mut core = new_core();
        let id = Uuid::new_v4();
        core.register(id, PeerKind::Agent).unwrap();
        let err = core.register(id, PeerKind::Client).unwrap_err();
        unpack_enum!(CoordinatorError::DuplicatePeer(dup) = err);
        assert_eq!(dup, id);
    }

    #[test]
    fn edges_are_symmetric() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();
        core.register(client, PeerKind::Client).unwrap();

        core.subscribe(client, agent).unwrap();
        assert_eq!(core.subscribers_of(agent), vec![client]);
        assert_eq!(core.subscriptions_of(client), vec![agent]);

        // Idempotent in both directions.
        core.subscribe(client, agent).unwrap();
        assert_eq!(core.subscribers_of(agent).len(), 1);
        core.unsubscribe(client, agent).unwrap();
        core.unsubscribe(client, agent).unwrap();
        assert!(core.subscribers_of(agent).is_empty());
        assert!(core.subscriptions_of(client).is_empty());
    }

    #[test]
    fn subscribe_snapshots_current_agent_node() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();
        core.register(client, PeerKind::Client).unwrap();
        assert_eq!(core.update_node(agent, node(5)), UpdateOutcome::Applied);

        core.subscribe(client, agent).unwrap();
        let queue = core.peers.get(&client).unwrap().queue.clone();
        unpack_enum!(PeerUpdate::Node { peer_id, node } = queue.try_pop().unwrap());
        assert_eq!((peer_id, node.seq), (agent, 5));

        // Re-subscribing replays the current state.
        core.subscribe(client, agent).unwrap();
        unpack_enum!(PeerUpdate::Node { peer_id, node } = queue.try_pop().unwrap());
        assert_eq!((peer_id, node.seq), (agent, 5));
    }

    #[test]
    fn subscribe_to_unknown_agent_is_a_pending_interest() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(client, PeerKind::Client).unwrap();

        core.subscribe(client, agent).unwrap();
        let queue = core.peers.get(&client).unwrap().queue.clone();
        assert!(queue.try_pop().is_none());

        core.register(agent, PeerKind::Agent).unwrap();
        assert_eq!(core.update_node(agent, node(1)), UpdateOutcome::Applied);
        unpack_enum!(PeerUpdate::Node { peer_id, node } = queue.try_pop().unwrap());
        assert_eq!((peer_id, node.seq), (agent, 1));
    }

    #[test]
    fn stale_sequence_numbers_are_dropped() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();

        assert_eq!(core.update_node(agent, node(5)), UpdateOutcome::Applied);
        assert_eq!(core.update_node(agent, node(5)), UpdateOutcome::Stale);
        assert_eq!(core.update_node(agent, node(4)), UpdateOutcome::Stale);
        assert_eq!(core.update_node(agent, node(6)), UpdateOutcome::Applied);
        assert_eq!(core.node_of(agent).unwrap().seq, 6);
    }

    #[test]
    fn agent_removal_notifies_subscribers_and_keeps_interest() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();
        core.register(client, PeerKind::Client).unwrap();
        core.update_node(agent, node(3));
        core.subscribe(client, agent).unwrap();

        let queue = core.peers.get(&client).unwrap().queue.clone();
        queue.try_pop(); // discard the subscribe snapshot

        assert!(core.remove(agent));
        unpack_enum!(PeerUpdate::Gone { peer_id } = queue.try_pop().unwrap());
        assert_eq!(peer_id, agent);
        assert!(core.node_of(agent).is_none());
        // Interest survives the agent's disconnect.
        assert_eq!(core.subscribers_of(agent), vec![client]);

        // A returning agent resumes fan-out without a re-subscribe. Sequence
        // numbers restart with the restarted peer.
        core.register(agent, PeerKind::Agent).unwrap();
        assert_eq!(core.update_node(agent, node(1)), UpdateOutcome::Applied);
        unpack_enum!(PeerUpdate::Node { peer_id, node } = queue.try_pop().unwrap());
        assert_eq!((peer_id, node.seq), (agent, 1));
    }

    #[test]
    fn client_removal_purges_edges_and_notifies_agents() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();
        core.register(client, PeerKind::Client).unwrap();
        core.subscribe(client, agent).unwrap();

        let agent_queue = core.peers.get(&agent).unwrap().queue.clone();
        assert!(core.remove(client));
        unpack_enum!(PeerUpdate::Gone { peer_id } = agent_queue.try_pop().unwrap());
        assert_eq!(peer_id, client);
        assert!(core.subscribers_of(agent).is_empty());

        // No ghost state: nothing subsequently mentions the client.
        core.update_node(agent, node(1));
        assert!(core.remove(client) == false);
    }

    #[test]
    fn client_updates_reach_subscribed_agents_only() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let other_agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();
        core.register(other_agent, PeerKind::Agent).unwrap();
        core.register(client, PeerKind::Client).unwrap();
        core.subscribe(client, agent).unwrap();

        assert_eq!(core.update_node(client, node(2)), UpdateOutcome::Applied);
        let agent_queue = core.peers.get(&agent).unwrap().queue.clone();
        let other_queue = core.peers.get(&other_agent).unwrap().queue.clone();
        unpack_enum!(PeerUpdate::Node { peer_id, node } = agent_queue.try_pop().unwrap());
        assert_eq!((peer_id, node.seq), (client, 2));
        assert!(other_queue.try_pop().is_none());
    }

    #[test]
    fn clear_closes_every_queue() {
        let mut core = new_core();
        let agent = Uuid::new_v4();
        let client = Uuid::new_v4();
        core.register(agent, PeerKind::Agent).unwrap();
        let client_queue = core.register(client, PeerKind::Client).unwrap();

        core.clear();
        assert!(client_queue.is_closed());
        assert!(core.node_of(agent).is_none());
        assert!(!core.remove(agent));
    }
}
