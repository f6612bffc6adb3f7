// SPDX-License-Identifier: MIT OR Apache-2.0
//! The bounded progress bus between the engine and the UI.

use eb_llb::SolveStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

/// Delivery counters for one build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressStats {
    /// Events forwarded to the subscriber.
    pub delivered: u64,
    /// Advisory events dropped under back-pressure.
    pub dropped: u64,
}

/// Forwards engine status to an optional subscriber channel.
///
/// Structural events (vertex start/complete) are always delivered, waiting
/// for capacity if needed; progress and log events are dropped when the
/// subscriber falls behind, so a slow UI can never stall the engine.
#[derive(Clone)]
pub struct ProgressBus {
    subscriber: Option<mpsc::Sender<SolveStatus>>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl ProgressBus {
    /// A bus with an optional subscriber.
    #[must_use]
    pub fn new(subscriber: Option<mpsc::Sender<SolveStatus>>) -> Self {
        Self {
            subscriber,
            delivered: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Drain `source` until the engine closes it.
    pub async fn pump(self, mut source: mpsc::Receiver<SolveStatus>) {
        while let Some(event) = source.recv().await {
            self.emit(event).await;
        }
    }

    async fn emit(&self, event: SolveStatus) {
        let Some(subscriber) = &self.subscriber else {
            trace!(target: "eb.builder", ?event, "status (no subscriber)");
            return;
        };
        if event.is_structural() {
            if subscriber.send(event).await.is_ok() {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            return;
        }
        match subscriber.try_send(event) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Current delivery counters.
    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
