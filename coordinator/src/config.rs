//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::time::Duration;

/// Tuning knobs for a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Target number of distinct updates a peer's send queue holds before the
    /// oldest pending node update is evicted. Coalescing keeps the queue at
    /// one pending update per source, so this is effectively a cap on fan-in
    /// breadth for a slow consumer.
    pub queue_capacity: usize,
    /// Maximum size in bytes of a single frame payload in either direction.
    pub max_frame_length: usize,
    /// How long a freshly accepted transport may take to complete the
    /// version handshake before the connection is abandoned.
    pub handshake_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            max_frame_length: 1024 * 1024,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
