//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::io;

use thiserror::Error;

use crate::node::PeerId;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("A peer with id '{0}' is already registered")]
    DuplicatePeer(PeerId),
    #[error("Peer '{0}' is not registered")]
    UnknownPeer(PeerId),
    #[error("The coordinator is shut down")]
    Closed,
    #[error("The coordinator state lock was poisoned")]
    PoisonedLock,
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Violations of the framed peer protocol. All of these are fatal to the
/// offending connection and to nothing else.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("Frame tag {0:#04x} is not valid in this direction")]
    WrongDirection(u8),
    #[error("Frame tag {0:#04x} is not permitted for this peer kind")]
    NotPermitted(u8),
    #[error("Frame of {len} bytes exceeds the maximum of {max} bytes")]
    MaxFrameLengthExceeded { len: usize, max: usize },
    #[error("Malformed frame payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("Frame payload had an unexpected length")]
    BadPayloadLength,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Peer requested unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("Handshake timed out")]
    TimedOut,
}
