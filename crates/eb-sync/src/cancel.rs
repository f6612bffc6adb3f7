// SPDX-License-Identifier: MIT OR Apache-2.0
//! A cloneable cancellation token.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Why a build (or part of one) was cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The user interrupted the build.
    Interrupt,
    /// A deadline expired.
    Timeout,
    /// A sibling task failed; this work is no longer needed.
    SiblingFailed(String),
    /// The process is shutting down.
    Shutdown,
}

impl CancelReason {
    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Interrupt => "cancelled by interrupt".to_string(),
            Self::Timeout => "cancelled due to timeout".to_string(),
            Self::SiblingFailed(err) => format!("cancelled because a sibling failed: {err}"),
            Self::Shutdown => "cancelled because the process is shutting down".to_string(),
        }
    }
}

/// A cloneable, cheaply-shareable cancellation token.
///
/// All clones share the same underlying state; cancelling one immediately
/// makes every clone observe `is_cancelled() == true`. Only the first
/// recorded reason is kept.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
}

impl CancelToken {
    /// Create a new token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent; later reasons are ignored.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut guard = self.inner.reason.lock().expect("reason lock poisoned");
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// True once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// The first recorded reason, if cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().expect("reason lock poisoned").clone()
    }

    /// Resolves when the token is cancelled; immediately if it already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn cancel_flips_state_and_keeps_first_reason() {
        let token = CancelToken::new();
        token.cancel(CancelReason::Timeout);
        token.cancel(CancelReason::Interrupt);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::Timeout));
    }

    #[test]
    fn clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        a.cancel(CancelReason::Shutdown);
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::task::yield_now().await;
        token.cancel(CancelReason::Interrupt);
        assert!(handle.await.expect("join"));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel(CancelReason::Interrupt);
        token.cancelled().await;
    }
}
