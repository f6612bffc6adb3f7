// SPDX-License-Identifier: MIT OR Apache-2.0
//! Build-time state shared across target conversions.
//!
//! - [`SingleTarget`] — the memoized result of converting one target for
//!   one `(platform, args)` key, with a completion subject for waiters.
//! - [`VisitedCollection`] — guarantees at-most-one concurrent conversion
//!   per key and detects dependency cycles.
//! - [`WaitBlock`] — lexical scoping for deferred side effects (image
//!   pushes, artifact saves, `RUN --push`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod starget;
mod visited;
mod waitblock;

pub use starget::{
    Completion, RunPush, SaveArtifact, SaveImage, SingleTarget, StatesError, TargetOutputs,
};
pub use visited::{StateKey, VisitedCollection};
pub use waitblock::{WaitBlock, WaitItem};
