//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Canonical framing for coordinator streams.
//!
//! Every frame is `tag:u8 | len:u32 (big endian) | payload`. The payload
//! layout per tag lives in [`crate::proto`]; this module only moves bytes.
//!
//! Before any frame is exchanged the peer writes a single version byte and
//! the coordinator echoes the version followed by the peer's 16-byte id.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    coordinator::error::{HandshakeError, ProtocolError},
    node::PeerId,
};

/// The only protocol version currently spoken.
pub const PROTOCOL_VERSION: u8 = 1;

const FRAME_HEADER_LEN: usize = 5;

/// A single tagged frame, payload not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: u8, payload: Bytes) -> Self {
        Self { tag, payload }
    }

    /// Serializes the frame as it appears on the wire. Used where a message
    /// boundary already exists (one websocket message carries one frame).
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(self.tag);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parses exactly one frame from a complete buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::BadPayloadLength);
        }
        let tag = buf[0];
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[1..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if buf.len() != FRAME_HEADER_LEN + len {
            return Err(ProtocolError::BadPayloadLength);
        }
        Ok(Self {
            tag,
            payload: Bytes::copy_from_slice(&buf[FRAME_HEADER_LEN..]),
        })
    }
}

/// Codec for [`Frame`]s over a byte stream.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_length: usize,
}

impl FrameCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[1..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > self.max_frame_length {
            return Err(ProtocolError::MaxFrameLengthExceeded {
                len,
                max: self.max_frame_length,
            });
        }
        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }
        let tag = src.get_u8();
        src.advance(4);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { tag, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if item.payload.len() > self.max_frame_length {
            return Err(ProtocolError::MaxFrameLengthExceeded {
                len: item.payload.len(),
                max: self.max_frame_length,
            });
        }
        dst.reserve(FRAME_HEADER_LEN + item.payload.len());
        dst.put_u8(item.tag);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

/// Coordinator-side handshake: read the peer's version byte, echo the version
/// and the peer's id. Fails the connection on an unknown version or if the
/// peer stays silent past `timeout`.
pub async fn perform_server_handshake<T>(
    transport: &mut T,
    peer_id: PeerId,
    timeout: Duration,
) -> Result<(), HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match time::timeout(timeout, server_handshake_inner(transport, peer_id)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(HandshakeError::TimedOut),
    }
}

async fn server_handshake_inner<T>(transport: &mut T, peer_id: PeerId) -> Result<(), HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut version = [0u8; 1];
    transport.read_exact(&mut version).await?;
    if version[0] != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version[0]));
    }
    let mut reply = [0u8; 17];
    reply[0] = PROTOCOL_VERSION;
    reply[1..].copy_from_slice(peer_id.as_bytes());
    transport.write_all(&reply).await?;
    transport.flush().await?;
    Ok(())
}

/// Peer-side handshake. Returns the peer id echoed by the coordinator.
pub async fn perform_client_handshake<T>(transport: &mut T) -> Result<PeerId, HandshakeError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    transport.write_all(&[PROTOCOL_VERSION]).await?;
    transport.flush().await?;
    let mut reply = [0u8; 17];
    transport.read_exact(&mut reply).await?;
    if reply[0] != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(reply[0]));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&reply[1..]);
    Ok(PeerId::from_bytes(id))
}
