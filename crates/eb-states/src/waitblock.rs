// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lexical scoping for deferred side effects.

use async_trait::async_trait;
use eb_sync::{CancelReason, CancelToken};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One deferred side effect registered in a wait block.
///
/// Items are registered inert; the converter flips the relevant switches
/// (`set_do_push`, `set_do_save`) based on the build mode, and the block
/// drives [`wait`](Self::wait) when it closes.
#[async_trait]
pub trait WaitItem: Send + Sync {
    /// Enable the push side of this item.
    fn set_do_push(&self);
    /// Enable the save side of this item.
    fn set_do_save(&self);
    /// Drive the item to completion. `ctx` cancellation must abort.
    async fn wait(&self, ctx: &CancelToken) -> anyhow::Result<()>;
}

/// An ordered list of wait items with a single completion point.
///
/// Items in one block run concurrently when the block closes; the block
/// fails fast — the first error cancels the remaining siblings, and the
/// reported error notes how many were cancelled.
#[derive(Default)]
pub struct WaitBlock {
    items: Mutex<Vec<Arc<dyn WaitItem>>>,
}

impl WaitBlock {
    /// An empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item into this block.
    pub fn add_item(&self, item: Arc<dyn WaitItem>) {
        self.items.lock().expect("wait block lock").push(item);
    }

    /// Number of registered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().expect("wait block lock").len()
    }

    /// True when no items are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the block: run all items concurrently and wait for them.
    ///
    /// Returns once every item has finished (or acknowledged cancellation).
    pub async fn wait(&self, ctx: &CancelToken) -> anyhow::Result<()> {
        let items: Vec<Arc<dyn WaitItem>> = {
            let mut guard = self.items.lock().expect("wait block lock");
            std::mem::take(&mut *guard)
        };
        if items.is_empty() {
            return Ok(());
        }
        debug!(target: "eb.states", count = items.len(), "closing wait block");

        // Items get a block-local token so a failing sibling cancels the
        // rest of the block without cancelling the caller's context.
        let block_ctx = CancelToken::new();
        let mut futures: FuturesUnordered<_> = items
            .iter()
            .map(|item| {
                let item = Arc::clone(item);
                let ctx = block_ctx.clone();
                async move { item.wait(&ctx).await }
            })
            .collect();

        let mut first_error: Option<anyhow::Error> = None;
        let mut cancelled_siblings = 0usize;
        let mut forwarded = false;
        loop {
            tokio::select! {
                maybe = futures.next() => {
                    let Some(result) = maybe else {
                        break;
                    };
                    match result {
                        Ok(()) => {}
                        Err(err) => {
                            if first_error.is_none() {
                                block_ctx.cancel(CancelReason::SiblingFailed(err.to_string()));
                                first_error = Some(err);
                            } else {
                                cancelled_siblings += 1;
                            }
                        }
                    }
                }
                () = ctx.cancelled(), if !forwarded => {
                    forwarded = true;
                    block_ctx.cancel(ctx.reason().unwrap_or(CancelReason::Shutdown));
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) if cancelled_siblings == 0 => Err(err),
            Some(err) => Err(err.context(format!(
                "additionally, {cancelled_siblings} sibling operation(s) did not complete"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingItem {
        push: AtomicBool,
        save: AtomicBool,
        ran: AtomicBool,
        fail: bool,
        delay_ms: u64,
        observed_cancel: AtomicBool,
    }

    #[async_trait]
    impl WaitItem for RecordingItem {
        fn set_do_push(&self) {
            self.push.store(true, Ordering::SeqCst);
        }
        fn set_do_save(&self) {
            self.save.store(true, Ordering::SeqCst);
        }
        async fn wait(&self, ctx: &CancelToken) -> anyhow::Result<()> {
            if self.delay_ms > 0 {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(self.delay_ms)) => {}
                    () = ctx.cancelled() => {
                        self.observed_cancel.store(true, Ordering::SeqCst);
                        anyhow::bail!("cancelled");
                    }
                }
            }
            if self.fail {
                anyhow::bail!("item failed");
            }
            self.ran.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn items_complete_before_wait_returns() {
        let block = WaitBlock::new();
        let items: Vec<Arc<RecordingItem>> = (0..3)
            .map(|_| Arc::new(RecordingItem::default()))
            .collect();
        for item in &items {
            block.add_item(Arc::clone(item) as Arc<dyn WaitItem>);
        }

        block.wait(&CancelToken::new()).await.expect("wait");
        for item in &items {
            assert!(item.ran.load(Ordering::SeqCst));
        }
        assert!(block.is_empty(), "items drain on close");
    }

    #[tokio::test]
    async fn first_error_cancels_siblings() {
        let block = WaitBlock::new();
        let failing = Arc::new(RecordingItem {
            fail: true,
            ..RecordingItem::default()
        });
        let slow = Arc::new(RecordingItem {
            delay_ms: 5_000,
            ..RecordingItem::default()
        });
        block.add_item(Arc::clone(&failing) as Arc<dyn WaitItem>);
        block.add_item(Arc::clone(&slow) as Arc<dyn WaitItem>);

        let err = block.wait(&CancelToken::new()).await.unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("item failed"), "unexpected error: {text}");
        assert!(slow.observed_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn error_reports_cancelled_sibling_count() {
        let block = WaitBlock::new();
        block.add_item(Arc::new(RecordingItem {
            fail: true,
            ..RecordingItem::default()
        }) as Arc<dyn WaitItem>);
        for _ in 0..2 {
            block.add_item(Arc::new(RecordingItem {
                delay_ms: 5_000,
                ..RecordingItem::default()
            }) as Arc<dyn WaitItem>);
        }

        let err = block.wait(&CancelToken::new()).await.unwrap_err();
        let text = format!("{err:#}");
        assert!(
            text.contains("2 sibling operation(s)"),
            "unexpected error: {text}"
        );
    }

    #[tokio::test]
    async fn empty_block_closes_immediately() {
        let block = WaitBlock::new();
        block.wait(&CancelToken::new()).await.expect("wait");
    }

    #[tokio::test]
    async fn switches_reach_items() {
        let item = Arc::new(RecordingItem::default());
        let as_item: Arc<dyn WaitItem> = Arc::clone(&item) as Arc<dyn WaitItem>;
        as_item.set_do_push();
        as_item.set_do_save();
        assert!(item.push.load(Ordering::SeqCst));
        assert!(item.save.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn items_run_concurrently() {
        let block = WaitBlock::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        struct ConcurrencyProbe {
            running: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl WaitItem for ConcurrencyProbe {
            fn set_do_push(&self) {}
            fn set_do_save(&self) {}
            async fn wait(&self, _ctx: &CancelToken) -> anyhow::Result<()> {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        for _ in 0..4 {
            block.add_item(Arc::new(ConcurrencyProbe {
                running: Arc::clone(&running),
                peak: Arc::clone(&peak),
            }));
        }
        block.wait(&CancelToken::new()).await.expect("wait");
        assert!(peak.load(Ordering::SeqCst) >= 2, "items overlapped");
    }
}
