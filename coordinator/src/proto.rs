//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Message layer of the coordinator protocol.
//!
//! | Tag  | Direction    | Payload                                        |
//! |------|--------------|------------------------------------------------|
//! | 0x01 | peer → coord | serialized node                                |
//! | 0x02 | peer → coord | 16-byte agent id                               |
//! | 0x03 | peer → coord | 16-byte agent id                               |
//! | 0x10 | coord → peer | 16-byte peer id + serialized node              |
//! | 0x11 | coord → peer | 16-byte peer id                                |
//! | 0x20 | coord → multi| 16-byte agent id + (node \| empty = gone)      |
//!
//! The node blob is the tailnet library's serialized form; it is not
//! interpreted here beyond decode/encode at the trust boundary.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    coordinator::error::ProtocolError,
    framing::Frame,
    node::{Node, PeerId},
};

pub mod tags {
    pub const SELF_UPDATE: u8 = 0x01;
    pub const SUBSCRIBE: u8 = 0x02;
    pub const UNSUBSCRIBE: u8 = 0x03;
    pub const NODE_UPDATE: u8 = 0x10;
    pub const PEER_GONE: u8 = 0x11;
    pub const MULTI_AGENT_UPDATE: u8 = 0x20;
}

const PEER_ID_LEN: usize = 16;

/// Messages a peer sends to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    SelfUpdate(Node),
    Subscribe(PeerId),
    Unsubscribe(PeerId),
}

/// Messages the coordinator sends to a peer.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordMessage {
    NodeUpdate { peer_id: PeerId, node: Node },
    PeerGone { peer_id: PeerId },
    /// Tagged with the agent subscription it pertains to so the multi-agent
    /// aggregator can demultiplex. `None` means the agent is gone.
    MultiAgentUpdate { agent_id: PeerId, node: Option<Node> },
}

impl PeerMessage {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.tag {
            tags::SELF_UPDATE => Ok(PeerMessage::SelfUpdate(decode_node(&frame.payload)?)),
            tags::SUBSCRIBE => Ok(PeerMessage::Subscribe(decode_peer_id(&frame.payload)?)),
            tags::UNSUBSCRIBE => Ok(PeerMessage::Unsubscribe(decode_peer_id(&frame.payload)?)),
            tags::NODE_UPDATE | tags::PEER_GONE | tags::MULTI_AGENT_UPDATE => {
                Err(ProtocolError::WrongDirection(frame.tag))
            },
            tag => Err(ProtocolError::UnknownTag(tag)),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        match self {
            PeerMessage::SelfUpdate(node) => Ok(Frame::new(tags::SELF_UPDATE, encode_node(node)?)),
            PeerMessage::Subscribe(agent_id) => {
                Ok(Frame::new(tags::SUBSCRIBE, Bytes::copy_from_slice(agent_id.as_bytes())))
            },
            PeerMessage::Unsubscribe(agent_id) => Ok(Frame::new(
                tags::UNSUBSCRIBE,
                Bytes::copy_from_slice(agent_id.as_bytes()),
            )),
        }
    }
}

impl CoordMessage {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.tag {
            tags::NODE_UPDATE => {
                let (peer_id, rest) = split_peer_id(&frame.payload)?;
                Ok(CoordMessage::NodeUpdate {
                    peer_id,
                    node: decode_node(rest)?,
                })
            },
            tags::PEER_GONE => Ok(CoordMessage::PeerGone {
                peer_id: decode_peer_id(&frame.payload)?,
            }),
            tags::MULTI_AGENT_UPDATE => {
                let (agent_id, rest) = split_peer_id(&frame.payload)?;
                let node = if rest.is_empty() {
                    None
                } else {
                    Some(decode_node(rest)?)
                };
                Ok(CoordMessage::MultiAgentUpdate { agent_id, node })
            },
            tags::SELF_UPDATE | tags::SUBSCRIBE | tags::UNSUBSCRIBE => {
                Err(ProtocolError::WrongDirection(frame.tag))
            },
            tag => Err(ProtocolError::UnknownTag(tag)),
        }
    }

    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        match self {
            CoordMessage::NodeUpdate { peer_id, node } => {
                let blob = serde_json::to_vec(node)?;
                let mut payload = BytesMut::with_capacity(PEER_ID_LEN + blob.len());
                payload.put_slice(peer_id.as_bytes());
                payload.put_slice(&blob);
                Ok(Frame::new(tags::NODE_UPDATE, payload.freeze()))
            },
            CoordMessage::PeerGone { peer_id } => Ok(Frame::new(
                tags::PEER_GONE,
                Bytes::copy_from_slice(peer_id.as_bytes()),
            )),
            CoordMessage::MultiAgentUpdate { agent_id, node } => {
                let blob = match node {
                    Some(node) => serde_json::to_vec(node)?,
                    None => Vec::new(),
                };
                let mut payload = BytesMut::with_capacity(PEER_ID_LEN + blob.len());
                payload.put_slice(agent_id.as_bytes());
                payload.put_slice(&blob);
                Ok(Frame::new(tags::MULTI_AGENT_UPDATE, payload.freeze()))
            },
        }
    }
}

fn decode_node(payload: &[u8]) -> Result<Node, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

fn encode_node(node: &Node) -> Result<Bytes, ProtocolError> {
    Ok(serde_json::to_vec(node)?.into())
}

fn decode_peer_id(payload: &[u8]) -> Result<PeerId, ProtocolError> {
    if payload.len() != PEER_ID_LEN {
        return Err(ProtocolError::BadPayloadLength);
    }
    let mut bytes = [0u8; PEER_ID_LEN];
    bytes.copy_from_slice(payload);
    Ok(PeerId::from_bytes(bytes))
}

fn split_peer_id(payload: &[u8]) -> Result<(PeerId, &[u8]), ProtocolError> {
    if payload.len() < PEER_ID_LEN {
        return Err(ProtocolError::BadPayloadLength);
    }
    let mut bytes = [0u8; PEER_ID_LEN];
    bytes.copy_from_slice(&payload[..PEER_ID_LEN]);
    Ok((PeerId::from_bytes(bytes), &payload[PEER_ID_LEN..]))
}
