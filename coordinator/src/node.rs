//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Peer identity and reachability types.
//!
//! A [`Node`] is produced by the tailnet library running inside each peer and
//! is carried by the coordinator as an opaque record. The coordinator never
//! inspects it beyond the sequence number (replace-on-write ordering) and the
//! first address (the legacy query, kept behind [`Node::has_legacy_addr`]).

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque 128-bit peer identifier. Agent ids and client ids come from
/// disjoint namespaces and are generated by the caller, never reused.
pub type PeerId = Uuid;

/// The historical per-agent link-local address that pre-dates multi-homed
/// nodes. An agent still advertising it as its primary address requires the
/// fallback per-agent transport.
pub const LEGACY_AGENT_IP: Ipv6Addr = Ipv6Addr::new(
    0xfd7a, 0x115c, 0xa1e0, 0x49d6, 0xb259, 0xb7ac, 0xb1b2, 0x48f4,
);

/// A peer's current reachability record.
///
/// The field layout is owned by the tailnet library and versioned there; the
/// coordinator round-trips it as a serialized blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Monotonically increasing sequence number assigned by the peer that
    /// produced this record. Restarts from 1 when the peer restarts.
    pub seq: u64,
    /// The peer's public key in the tailnet library's text encoding.
    pub key: String,
    /// Addresses assigned to this peer inside the overlay.
    pub addresses: Vec<IpAddr>,
    /// Candidate UDP endpoints for direct connectivity.
    pub endpoints: Vec<SocketAddr>,
    /// Preferred DERP region for relayed traffic.
    pub preferred_derp: i32,
}

impl Node {
    /// Whether this node's primary address is the well-known legacy agent IP.
    pub fn has_legacy_addr(&self) -> bool {
        self.addresses.first() == Some(&IpAddr::V6(LEGACY_AGENT_IP))
    }
}
