//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The coordinator facade.
//!
//! A [`Coordinator`] accepts already-authenticated, already-upgraded duplex
//! byte streams and serves them as agents, clients or multi-agent peers.
//! State is entirely in memory; peers re-announce on reconnect.

pub mod error;

pub(crate) mod core;
mod serve;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use log::*;
use tether_shutdown::Shutdown;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Notify,
};

pub use self::core::{AgentSummary, ClientSummary, DebugSnapshot};
use self::core::{Core, PeerKind, SharedCore};
pub use self::error::CoordinatorError;
use crate::{
    config::CoordinatorConfig,
    multiagent::MultiAgent,
    node::{Node, PeerId},
};

const LOG_TARGET: &str = "tether::coordinator";

/// In-memory rendezvous point for workspace agents and their clients.
///
/// One serve call per transport; each runs to completion. All serve loops
/// terminate before [`Coordinator::shutdown`] returns.
pub struct Coordinator {
    core: SharedCore,
    config: CoordinatorConfig,
    shutdown: Shutdown,
    serves: Arc<ServeGauge>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            core: SharedCore::new(Core::new(&config)),
            config,
            shutdown: Shutdown::new(),
            serves: Arc::new(ServeGauge::default()),
        }
    }

    /// Serves a workspace agent. Returns when the transport dies, the agent
    /// violates the protocol, or the coordinator shuts down.
    pub async fn serve_agent<T>(&self, transport: T, agent_id: PeerId) -> Result<(), CoordinatorError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.serve(transport, agent_id, PeerKind::Agent, None).await
    }

    /// Serves a client. `initial_agent_id` is sugar for the common case of a
    /// client interested in exactly one agent.
    pub async fn serve_client<T>(
        &self,
        transport: T,
        client_id: PeerId,
        initial_agent_id: Option<PeerId>,
    ) -> Result<(), CoordinatorError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.serve(transport, client_id, PeerKind::Client, initial_agent_id)
            .await
    }

    /// Serves a multi-agent peer over a byte stream speaking the framed
    /// protocol; outbound updates are tagged with the agent subscription they
    /// pertain to. This is the wire twin of [`Coordinator::serve_multi_agent`].
    pub async fn serve_multi_agent_stream<T>(
        &self,
        transport: T,
        peer_id: PeerId,
    ) -> Result<(), CoordinatorError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.serve(transport, peer_id, PeerKind::MultiAgent, None).await
    }

    async fn serve<T>(
        &self,
        transport: T,
        peer_id: PeerId,
        kind: PeerKind,
        initial_subscription: Option<PeerId>,
    ) -> Result<(), CoordinatorError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let _guard = ServeGauge::enter(&self.serves);
        if self.shutdown.is_triggered() {
            return Err(CoordinatorError::Closed);
        }
        serve::serve_peer(
            self.core.clone(),
            self.config,
            transport,
            peer_id,
            kind,
            initial_subscription,
            self.shutdown.to_signal(),
        )
        .await
    }

    /// Binds an in-process multi-agent peer and hands back its handle. Used
    /// by callers that multiplex many subscriptions over one relationship,
    /// such as regional workspace proxies.
    pub fn serve_multi_agent(&self, peer_id: PeerId) -> Result<MultiAgent, CoordinatorError> {
        if self.shutdown.is_triggered() {
            return Err(CoordinatorError::Closed);
        }
        let queue = self.core.lock()?.register(peer_id, PeerKind::MultiAgent)?;
        info!(target: LOG_TARGET, "Serving multi-agent peer '{}'", peer_id);
        Ok(MultiAgent::new(peer_id, self.core.clone(), queue))
    }

    /// The last node announced by `peer_id`, if it is currently connected.
    /// There is no distinction between "never connected" and "disconnected".
    pub fn node_of(&self, peer_id: PeerId) -> Option<Node> {
        match self.core.lock() {
            Ok(core) => core.node_of(peer_id),
            Err(err) => {
                error!(target: LOG_TARGET, "Failed to read node for '{}': {}", peer_id, err);
                None
            },
        }
    }

    /// Read-only summary of connected peers for the debug surface.
    pub fn debug_snapshot(&self) -> Result<DebugSnapshot, CoordinatorError> {
        Ok(self.core.lock()?.debug_snapshot())
    }

    /// Cancels every serve loop, drops all peer state and waits for every
    /// send loop to flush. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        match self.core.lock() {
            Ok(mut core) => core.clear(),
            Err(err) => error!(target: LOG_TARGET, "Failed to clear state at shutdown: {}", err),
        }
        self.serves.wait_idle().await;
        info!(target: LOG_TARGET, "Coordinator shut down");
    }
}

/// Counts in-flight serve calls so shutdown can drain them.
#[derive(Default)]
struct ServeGauge {
    active: AtomicUsize,
    idle: Notify,
}

impl ServeGauge {
    fn enter(gauge: &Arc<ServeGauge>) -> ServeGuard {
        gauge.active.fetch_add(1, Ordering::SeqCst);
        ServeGuard {
            gauge: Arc::clone(gauge),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking, so a guard dropped in between still
            // wakes this waiter.
            notified.as_mut().enable();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct ServeGuard {
    gauge: Arc<ServeGauge>,
}

impl Drop for ServeGuard {
    fn drop(&mut self) {
        if self.gauge.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gauge.idle.notify_waiters();
        }
    }
}
