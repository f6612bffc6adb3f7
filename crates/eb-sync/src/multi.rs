// SPDX-License-Identifier: MIT OR Apache-2.0
//! A composite cancellation source.

use crate::cancel::{CancelReason, CancelToken};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

/// Error returned when adding to an already-completed [`MultiCancel`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("composite cancellation has already fired")]
pub struct AlreadyCancelled;

/// Fires only when *all* contributing tokens have been cancelled.
///
/// Once fired it cannot un-fire, so adding further sources is an error.
/// The first source to cancel provides the reported reason, and
/// [`deadline`](Self::deadline) is the earliest contributed deadline.
#[derive(Clone)]
pub struct MultiCancel {
    state: Arc<Mutex<State>>,
    composite: CancelToken,
}

struct State {
    total: usize,
    done: usize,
    fired: bool,
    first_reason: Option<CancelReason>,
    deadlines: Vec<Instant>,
}

impl MultiCancel {
    /// Create a composite seeded with one source token.
    #[must_use]
    pub fn new(source: CancelToken) -> Self {
        let mc = Self {
            state: Arc::new(Mutex::new(State {
                total: 0,
                done: 0,
                fired: false,
                first_reason: None,
                deadlines: Vec::new(),
            })),
            composite: CancelToken::new(),
        };
        mc.add(source).expect("fresh composite cannot be fired");
        mc
    }

    /// Add another source. Fails if the composite has already fired.
    pub fn add(&self, source: CancelToken) -> Result<(), AlreadyCancelled> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.fired {
                return Err(AlreadyCancelled);
            }
            state.total += 1;
        }

        let state = Arc::clone(&self.state);
        let composite = self.composite.clone();
        tokio::spawn(async move {
            source.cancelled().await;
            let fire = {
                let mut st = state.lock().expect("state lock poisoned");
                st.done += 1;
                if st.first_reason.is_none() {
                    st.first_reason = source.reason();
                }
                if st.done == st.total && !st.fired {
                    st.fired = true;
                    true
                } else {
                    false
                }
            };
            if fire {
                let reason = {
                    let st = state.lock().expect("state lock poisoned");
                    st.first_reason.clone()
                };
                composite.cancel(reason.unwrap_or(CancelReason::Shutdown));
            }
        });

        Ok(())
    }

    /// Record a deadline from one of the contributing sources.
    pub fn add_deadline(&self, deadline: Instant) {
        self.state
            .lock()
            .expect("state lock poisoned")
            .deadlines
            .push(deadline);
    }

    /// The earliest contributed deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .deadlines
            .iter()
            .min()
            .copied()
    }

    /// True once every contributing source has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.composite.is_cancelled()
    }

    /// The reason reported by the first source to cancel, once fired.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.composite.reason()
    }

    /// Resolves when the composite fires.
    pub async fn cancelled(&self) {
        self.composite.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_only_when_all_sources_cancel() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let mc = MultiCancel::new(a.clone());
        mc.add(b.clone()).expect("add");

        a.cancel(CancelReason::Interrupt);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!mc.is_cancelled(), "one of two is not enough");

        b.cancel(CancelReason::Shutdown);
        mc.cancelled().await;
        assert!(mc.is_cancelled());
    }

    #[tokio::test]
    async fn reports_the_first_reason() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let mc = MultiCancel::new(a.clone());
        mc.add(b.clone()).expect("add");

        b.cancel(CancelReason::Timeout);
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.cancel(CancelReason::Interrupt);
        mc.cancelled().await;
        assert_eq!(mc.reason(), Some(CancelReason::Timeout));
    }

    #[tokio::test]
    async fn add_after_fired_is_an_error() {
        let a = CancelToken::new();
        let mc = MultiCancel::new(a.clone());
        a.cancel(CancelReason::Interrupt);
        mc.cancelled().await;
        assert_eq!(mc.add(CancelToken::new()), Err(AlreadyCancelled));
    }

    #[tokio::test]
    async fn earliest_deadline_wins() {
        let mc = MultiCancel::new(CancelToken::new());
        let now = Instant::now();
        let later = now + Duration::from_secs(60);
        mc.add_deadline(later);
        mc.add_deadline(now);
        assert_eq!(mc.deadline(), Some(now));
    }

    #[tokio::test]
    async fn single_source_composite_fires_with_it() {
        let a = CancelToken::new();
        let mc = MultiCancel::new(a.clone());
        a.cancel(CancelReason::Interrupt);
        mc.cancelled().await;
        assert!(mc.is_cancelled());
    }
}
