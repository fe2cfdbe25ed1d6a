//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Per-peer coalescing send queue.
//!
//! Not a plain FIFO: node updates are kept in a slot per source peer, and the
//! FIFO holds ticketed references to those slots. Enqueueing a newer update
//! for a source that already has a slot replaces the slot contents in place,
//! so a slow consumer only ever sees the most recent state per source. A
//! "gone" event empties the source's slot (its queued reference goes stale
//! and is skipped on pop) and is itself never dropped.
//!
//! Producers are the fan-out engine, which enqueues under the coordinator
//! lock; the consumer is the peer's single send loop (or the multi-agent
//! batch puller).

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use log::*;
use tokio::sync::Notify;

use crate::node::{Node, PeerId};

const LOG_TARGET: &str = "tether::coordinator::queue";

/// An update delivered on a peer's outbound stream, tagged with the source
/// peer it pertains to.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerUpdate {
    Node { peer_id: PeerId, node: Node },
    Gone { peer_id: PeerId },
}

impl PeerUpdate {
    pub fn peer_id(&self) -> PeerId {
        match self {
            PeerUpdate::Node { peer_id, .. } => *peer_id,
            PeerUpdate::Gone { peer_id } => *peer_id,
        }
    }
}

#[derive(Debug)]
enum Entry {
    Node { peer_id: PeerId, ticket: u64 },
    Gone { peer_id: PeerId },
}

#[derive(Debug)]
struct Pending {
    node: Node,
    ticket: u64,
}

#[derive(Debug, Default)]
struct Inner {
    order: VecDeque<Entry>,
    pending: HashMap<PeerId, Pending>,
    next_ticket: u64,
    closed: bool,
}

impl Inner {
    fn pop_ready(&mut self) -> Option<PeerUpdate> {
        while let Some(entry) = self.order.pop_front() {
            match entry {
                Entry::Gone { peer_id } => return Some(PeerUpdate::Gone { peer_id }),
                Entry::Node { peer_id, ticket } => {
                    if self.pending.get(&peer_id).map(|p| p.ticket) == Some(ticket) {
                        if let Some(pending) = self.pending.remove(&peer_id) {
                            return Some(PeerUpdate::Node {
                                peer_id,
                                node: pending.node,
                            });
                        }
                    }
                    // Stale slot reference; superseded by a later entry.
                },
            }
        }
        None
    }
}

#[derive(Debug)]
pub struct SendQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A producer panicking mid-enqueue leaves the structure sound;
            // the consumer must keep draining.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueues (or coalesces) a node update from `peer_id`.
    pub fn push_node(&self, peer_id: PeerId, node: Node) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        if let Some(pending) = inner.pending.get_mut(&peer_id) {
            // Coalesce: the queued slot keeps its place in line.
            pending.node = node;
        } else {
            if inner.order.len() >= self.capacity {
                evict_oldest_node(&mut inner);
            }
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.pending.insert(peer_id, Pending { node, ticket });
            inner.order.push_back(Entry::Node { peer_id, ticket });
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueues a gone event from `peer_id`, superseding any pending node
    /// update for it. Gone events are never dropped.
    pub fn push_gone(&self, peer_id: PeerId) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.pending.remove(&peer_id);
        inner.order.push_back(Entry::Gone { peer_id });
        drop(inner);
        self.notify.notify_one();
    }

    /// Removes and returns the next update without waiting.
    pub fn try_pop(&self) -> Option<PeerUpdate> {
        self.lock().pop_ready()
    }

    /// Waits for the next update. Returns `None` once the queue is closed and
    /// fully drained.
    pub async fn pop(&self) -> Option<PeerUpdate> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(update) = inner.pop_ready() {
                    return Some(update);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Waits until at least one update is queued, then drains everything
    /// queued as one batch. Returns `None` once closed and drained.
    pub async fn pop_batch(&self) -> Option<Vec<PeerUpdate>> {
        loop {
            {
                let mut inner = self.lock();
                let mut batch = Vec::new();
                while let Some(update) = inner.pop_ready() {
                    batch.push(update);
                }
                if !batch.is_empty() {
                    return Some(batch);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Closes the queue. Already-queued updates remain poppable; further
    /// pushes are ignored. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        drop(inner);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of queued entries, stale slot references included.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_oldest_node(inner: &mut Inner) {
    let pos = inner.order.iter().position(|entry| match entry {
        Entry::Node { peer_id, ticket } => {
            inner.pending.get(peer_id).map(|p| p.ticket) == Some(*ticket)
        },
        Entry::Gone { .. } => false,
    });
    if let Some(pos) = pos {
        if let Some(Entry::Node { peer_id, .. }) = inner.order.remove(pos) {
            inner.pending.remove(&peer_id);
            warn!(
                target: LOG_TARGET,
                "Send queue at capacity; dropped the oldest pending update (peer '{}')", peer_id
            );
        }
    }
}
