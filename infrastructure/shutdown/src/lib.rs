//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Cooperative shutdown signalling.
//!
//! A [`Shutdown`] owns the trigger side of a shared oneshot. Any number of
//! [`ShutdownSignal`]s can be cloned from it and awaited concurrently; all of
//! them resolve once the trigger fires or the last `Shutdown` is dropped.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::{
    channel::oneshot,
    future::{FusedFuture, Shared},
    FutureExt,
};

/// Trigger half of a shutdown channel. Cloning shares the same trigger.
///
/// Dropping every clone without calling [`Shutdown::trigger`] also resolves
/// the signals, so a task holding only a signal can never be left dangling.
#[derive(Debug, Clone)]
pub struct Shutdown {
    trigger: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    signal: ShutdownSignal,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            signal: ShutdownSignal { inner: rx.shared() },
        }
    }

    /// Returns a signal that resolves once this shutdown is triggered.
    pub fn to_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Fires the shutdown signal. Subsequent calls are a no-op.
    pub fn trigger(&self) {
        let mut lock = match self.trigger.lock() {
            Ok(lock) => lock,
            // A poisoned trigger mutex means a holder panicked mid-trigger;
            // the signal must still fire.
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = lock.take() {
            let _result = tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        match self.trigger.lock() {
            Ok(lock) => lock.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive half of a shutdown channel. Resolves to `()` when triggered.
#[derive(Debug, Clone)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ShutdownSignal {
    inner: Shared<oneshot::Receiver<()>>,
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Guard against re-polling a completed Shared from inside select loops.
        if self.inner.is_terminated() {
            return Poll::Ready(());
        }
        match Pin::new(&mut self.inner).poll(cx) {
            // Triggered, or every Shutdown was dropped. Both mean "stop".
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedFuture for ShutdownSignal {
    fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}
