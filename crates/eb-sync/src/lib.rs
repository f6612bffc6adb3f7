// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation and single-flight primitives.
//!
//! - [`CancelToken`] — a cloneable token signalling cooperative cancellation,
//!   with a first-reason record.
//! - [`MultiCancel`] — a composite that fires only when *every* contributing
//!   token has been cancelled, tracking the earliest contributed deadline.
//! - [`SyncCache`] — a keyed single-flight cache: concurrent callers of the
//!   same key collapse into one computation and share its result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod multi;
mod synccache;

pub use cancel::{CancelReason, CancelToken};
pub use multi::{AlreadyCancelled, MultiCancel};
pub use synccache::SyncCache;
