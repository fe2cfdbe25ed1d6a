//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Test support: in-memory duplex transports and a scripted peer that speaks
//! the coordinator protocol. Not part of the service surface.

use std::{
    net::IpAddr,
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use crate::{
    coordinator::error::HandshakeError,
    framing::{perform_client_handshake, Frame, FrameCodec},
    node::{Node, PeerId, LEGACY_AGENT_IP},
    proto::{CoordMessage, PeerMessage},
};

pub const TRANSPORT_BUFFER_SIZE: usize = 64 * 1024;

/// Builds a connected pair of in-memory transports; hand one end to a serve
/// call and drive the other from the test.
pub fn build_connected_transports() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(TRANSPORT_BUFFER_SIZE)
}

/// Same, with a tiny buffer so the coordinator-side writer wedges quickly.
pub fn build_wedged_transports(buffer: usize) -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(buffer)
}

pub fn test_node(seq: u64) -> Node {
    Node {
        seq,
        key: format!("nodekey:{seq:016x}"),
        addresses: vec!["fd7a:115c:a1e0::1".parse().unwrap()],
        endpoints: vec!["10.0.0.1:41641".parse().unwrap()],
        preferred_derp: 9,
    }
}

/// A node whose primary address is the well-known legacy agent IP.
pub fn legacy_node(seq: u64) -> Node {
    Node {
        addresses: vec![IpAddr::V6(LEGACY_AGENT_IP)],
        ..test_node(seq)
    }
}

/// A peer driven from test code: performs the handshake, then exchanges
/// frames over the transport.
pub struct TestPeer {
    id: PeerId,
    framed: Framed<DuplexStream, FrameCodec>,
}

impl TestPeer {
    pub async fn connect(mut transport: DuplexStream, id: PeerId) -> Result<Self, HandshakeError> {
        let echoed = perform_client_handshake(&mut transport).await?;
        assert_eq!(echoed, id, "coordinator echoed the wrong peer id");
        Ok(Self {
            id,
            framed: Framed::new(transport, FrameCodec::new(1024 * 1024)),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub async fn send(&mut self, message: &PeerMessage) {
        self.framed
            .send(message.to_frame().expect("failed to encode test message"))
            .await
            .expect("failed to send test message");
    }

    /// Sends a raw frame, valid or not.
    pub async fn send_frame(&mut self, frame: Frame) {
        self.framed.send(frame).await.expect("failed to send test frame");
    }

    /// Receives the next coordinator message; `None` on EOF.
    pub async fn recv(&mut self) -> Option<CoordMessage> {
        let frame = self.framed.next().await?.expect("transport error in test peer");
        Some(CoordMessage::from_frame(&frame).expect("coordinator sent an invalid frame"))
    }

    /// Receives with a timeout, panicking if nothing arrives in time.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<CoordMessage> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .expect("timed out waiting for a coordinator message")
    }

    /// Asserts that no message arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(message) = tokio::time::timeout(window, self.framed.next()).await {
            panic!("expected silence, got {message:?}");
        }
    }

    /// Asserts the coordinator closes the stream.
    pub async fn expect_disconnect(&mut self, timeout: Duration) {
        let eof = tokio::time::timeout(timeout, async {
            loop {
                match self.framed.next().await {
                    None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {},
                }
            }
        })
        .await;
        eof.expect("timed out waiting for the coordinator to disconnect us");
    }
}
