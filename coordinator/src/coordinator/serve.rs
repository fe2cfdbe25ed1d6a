//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Per-peer serving: one receive loop and one send loop per connected peer,
//! cooperating through a per-connection shutdown signal. Either loop
//! observing transport failure cancels the other.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::*;
use tether_shutdown::{Shutdown, ShutdownSignal};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{
    config::CoordinatorConfig,
    coordinator::{
        core::{PeerKind, SharedCore},
        error::{CoordinatorError, ProtocolError},
    },
    framing::{perform_server_handshake, Frame, FrameCodec},
    node::PeerId,
    proto::{CoordMessage, PeerMessage},
    queue::{PeerUpdate, SendQueue},
};

const LOG_TARGET: &str = "tether::coordinator::serve";

/// Runs a peer connection to completion: handshake, registration, send and
/// receive loops, teardown. Returns once the transport dies, the peer
/// violates the protocol, or the coordinator shuts down.
pub(crate) async fn serve_peer<T>(
    core: SharedCore,
    config: CoordinatorConfig,
    mut transport: T,
    peer_id: PeerId,
    kind: PeerKind,
    initial_subscription: Option<PeerId>,
    mut shutdown_signal: ShutdownSignal,
) -> Result<(), CoordinatorError>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    perform_server_handshake(&mut transport, peer_id, config.handshake_timeout).await?;

    let queue = core.lock()?.register(peer_id, kind)?;
    if let Some(agent_id) = initial_subscription {
        if let Err(err) = core
            .lock()
            .and_then(|mut core| core.subscribe(peer_id, agent_id))
        {
            core.lock()?.remove(peer_id);
            return Err(err);
        }
    }

    let (read_half, write_half) = tokio::io::split(transport);
    let framed_read = FramedRead::new(read_half, FrameCodec::new(config.max_frame_length));
    let framed_write = FramedWrite::new(write_half, FrameCodec::new(config.max_frame_length));

    let conn_shutdown = Shutdown::new();
    let send_task = tokio::task::spawn(send_loop(
        queue,
        framed_write,
        peer_id,
        kind,
        conn_shutdown.clone(),
    ));

    let result = receive_loop(
        &core,
        framed_read,
        peer_id,
        kind,
        conn_shutdown.to_signal(),
        &mut shutdown_signal,
    )
    .await;

    // Teardown order matters: cancel the counterpart, purge state and edges
    // (closing the queue), then wait for the send loop to finish flushing.
    conn_shutdown.trigger();
    core.lock()?.remove(peer_id);
    if let Err(err) = send_task.await {
        error!(target: LOG_TARGET, "Send loop for peer '{}' panicked: {}", peer_id, err);
    }
    result
}

async fn receive_loop<R>(
    core: &SharedCore,
    mut framed_read: FramedRead<R, FrameCodec>,
    peer_id: PeerId,
    kind: PeerKind,
    mut conn_signal: ShutdownSignal,
    shutdown_signal: &mut ShutdownSignal,
) -> Result<(), CoordinatorError>
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = &mut *shutdown_signal => {
                debug!(target: LOG_TARGET, "Coordinator is shutting down; disconnecting peer '{}'", peer_id);
                return Ok(());
            },
            _ = &mut conn_signal => {
                return Ok(());
            },
            frame = framed_read.next() => match frame {
                Some(Ok(frame)) => {
                    if let Err(err) = handle_frame(core, peer_id, kind, &frame) {
                        warn!(target: LOG_TARGET, "Disconnecting peer '{}': {}", peer_id, err);
                        return Err(err);
                    }
                },
                Some(Err(err)) => {
                    warn!(target: LOG_TARGET, "Failed to read from peer '{}': {}", peer_id, err);
                    return Err(err.into());
                },
                None => {
                    debug!(target: LOG_TARGET, "Peer '{}' disconnected", peer_id);
                    return Ok(());
                },
            },
        }
    }
}

fn handle_frame(
    core: &SharedCore,
    peer_id: PeerId,
    kind: PeerKind,
    frame: &Frame,
) -> Result<(), CoordinatorError> {
    match PeerMessage::from_frame(frame)? {
        PeerMessage::SelfUpdate(node) => {
            trace!(target: LOG_TARGET, "Node update from peer '{}' (seq {})", peer_id, node.seq);
            // A stale sequence number is dropped, not fatal.
            core.lock()?.update_node(peer_id, node);
            Ok(())
        },
        PeerMessage::Subscribe(agent_id) => {
            if kind == PeerKind::Agent {
                return Err(ProtocolError::NotPermitted(frame.tag).into());
            }
            core.lock()?.subscribe(peer_id, agent_id)
        },
        PeerMessage::Unsubscribe(agent_id) => {
            if kind == PeerKind::Agent {
                return Err(ProtocolError::NotPermitted(frame.tag).into());
            }
            core.lock()?.unsubscribe(peer_id, agent_id)
        },
    }
}

async fn send_loop<T>(
    queue: Arc<SendQueue>,
    mut sink: FramedWrite<WriteHalf<T>, FrameCodec>,
    peer_id: PeerId,
    kind: PeerKind,
    conn_shutdown: Shutdown,
) where
    T: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(update) = queue.pop().await {
        let message = match (kind, update) {
            (PeerKind::MultiAgent, PeerUpdate::Node { peer_id: source, node }) => {
                CoordMessage::MultiAgentUpdate {
                    agent_id: source,
                    node: Some(node),
                }
            },
            (PeerKind::MultiAgent, PeerUpdate::Gone { peer_id: source }) => {
                CoordMessage::MultiAgentUpdate {
                    agent_id: source,
                    node: None,
                }
            },
            (_, PeerUpdate::Node { peer_id: source, node }) => CoordMessage::NodeUpdate {
                peer_id: source,
                node,
            },
            (_, PeerUpdate::Gone { peer_id: source }) => CoordMessage::PeerGone { peer_id: source },
        };
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!(target: LOG_TARGET, "Failed to encode update for peer '{}': {}", peer_id, err);
                continue;
            },
        };
        if let Err(err) = sink.send(frame).await {
            debug!(target: LOG_TARGET, "Failed to write to peer '{}': {}", peer_id, err);
            conn_shutdown.trigger();
            return;
        }
    }

    // Queue closed: everything popped has been written; push any bytes still
    // buffered in the sink before the transport drops.
    if let Err(err) = sink.flush().await {
        debug!(target: LOG_TARGET, "Failed to flush final bytes to peer '{}': {}", peer_id, err);
    }
    conn_shutdown.trigger();
}
