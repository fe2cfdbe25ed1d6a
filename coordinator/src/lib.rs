//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! # Tether Coordinator
//!
//! The rendezvous and state-propagation service of the Tether control plane.
//! Every running workspace hosts an *agent*; developer CLIs, browser apps,
//! IDE plugins and regional proxies connect as *clients*. The coordinator
//! keeps every peer supplied with the current reachability record ("node")
//! of every peer it needs to talk to, over persistent duplex streams.
//!
//! State is ephemeral by design: peers re-announce on reconnect, and nothing
//! is persisted across coordinator restarts.

pub mod config;
pub mod coordinator;
pub mod framing;
pub mod http;
pub mod multiagent;
pub mod node;
pub mod proto;
pub mod queue;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use self::{
    config::CoordinatorConfig,
    coordinator::{Coordinator, CoordinatorError},
    multiagent::{MultiAgent, MultiAgentError},
    node::{Node, PeerId, LEGACY_AGENT_IP},
    queue::PeerUpdate,
};
