//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The multi-agent aggregator.
//!
//! A regional workspace proxy terminates thousands of client connections at
//! the edge; giving each of them a coordinator stream would square the
//! control-plane footprint. A [`MultiAgent`] is a single synthetic peer that
//! carries an unbounded set of agent subscriptions. Updates are pulled in
//! coalesced batches, each entry tagged with the agent it pertains to.

use std::sync::Arc;

use log::*;
use thiserror::Error;

use crate::{
    coordinator::{
        core::{SharedCore, UpdateOutcome},
        error::CoordinatorError,
    },
    node::{Node, PeerId},
    queue::{PeerUpdate, SendQueue},
};

const LOG_TARGET: &str = "tether::coordinator::multiagent";

#[derive(Debug, Error)]
pub enum MultiAgentError {
    #[error("The multi-agent connection is closed")]
    Closed,
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Handle to an in-process multi-agent peer. Obtained from
/// [`Coordinator::serve_multi_agent`](crate::Coordinator::serve_multi_agent).
///
/// Once closed (explicitly, or because the coordinator shut down), every
/// operation fails with [`MultiAgentError::Closed`] and
/// [`MultiAgent::next_update`] yields `None` after draining what was queued.
pub struct MultiAgent {
    id: PeerId,
    core: SharedCore,
    queue: Arc<SendQueue>,
}

impl MultiAgent {
    pub(crate) fn new(id: PeerId, core: SharedCore, queue: Arc<SendQueue>) -> Self {
        Self { id, core, queue }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Adds an agent subscription. Idempotent; every call replays the
    /// agent's current node into the update queue when there is one.
    pub fn subscribe_agent(&self, agent_id: PeerId) -> Result<(), MultiAgentError> {
        self.ensure_open()?;
        match self.core.lock()?.subscribe(self.id, agent_id) {
            Ok(()) => Ok(()),
            Err(CoordinatorError::UnknownPeer(_)) => Err(MultiAgentError::Closed),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes an agent subscription. Idempotent.
    pub fn unsubscribe_agent(&self, agent_id: PeerId) -> Result<(), MultiAgentError> {
        self.ensure_open()?;
        match self.core.lock()?.unsubscribe(self.id, agent_id) {
            Ok(()) => Ok(()),
            Err(CoordinatorError::UnknownPeer(_)) => Err(MultiAgentError::Closed),
            Err(err) => Err(err.into()),
        }
    }

    /// Advertises this peer's own relay node to every subscribed agent, so
    /// agents can reach the clients behind it.
    pub fn update_self(&self, node: Node) -> Result<(), MultiAgentError> {
        self.ensure_open()?;
        match self.core.lock()?.update_node(self.id, node) {
            UpdateOutcome::Applied | UpdateOutcome::Stale => Ok(()),
            UpdateOutcome::UnknownPeer => Err(MultiAgentError::Closed),
        }
    }

    /// Pulls the next batch of coalesced updates, waiting if none are
    /// queued. Returns `None` once the handle is closed and drained.
    pub async fn next_update(&self) -> Option<Vec<PeerUpdate>> {
        self.queue.pop_batch().await
    }

    /// Whether the agent's advertised primary address is the well-known
    /// legacy IP, requiring the fallback per-agent transport. An unknown or
    /// node-less agent is not legacy.
    pub fn agent_is_legacy(&self, agent_id: PeerId) -> bool {
        match self.core.lock() {
            Ok(core) => core
                .node_of(agent_id)
                .map(|node| node.has_legacy_addr())
                .unwrap_or(false),
            Err(err) => {
                error!(target: LOG_TARGET, "Failed to read node for '{}': {}", agent_id, err);
                false
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Unregisters the peer, notifies subscribed agents and closes the
    /// update queue. Closing an already-closed handle returns
    /// [`MultiAgentError::Closed`].
    pub fn close(&self) -> Result<(), MultiAgentError> {
        if self.queue.is_closed() {
            return Err(MultiAgentError::Closed);
        }
        self.core.lock()?.remove(self.id);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), MultiAgentError> {
        if self.queue.is_closed() {
            return Err(MultiAgentError::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MultiAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAgent")
            .field("id", &self.id)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}
