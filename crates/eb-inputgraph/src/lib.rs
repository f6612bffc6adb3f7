// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic fingerprinting of everything that can influence a
//! target's output, for auto-skip.
//!
//! [`hash_target`] walks a target's recipe without running it: commands in
//! order (flag values in flag-name-sorted order, length-prefixed), every
//! file a `COPY`-like command can read (respecting ignore rules), every
//! referenced target recursively, every consumed ARG's resolved value, the
//! platform, and the builtin ARGs the recipe reads. An unchanged
//! fingerprint means the target can be skipped wholesale.
//!
//! Dynamic constructs that would make the fingerprint unsound (`$(…)`
//! shell-outs, unsupported remote forms) are hard errors, never silent
//! false positives.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod hasher;
mod loader;
mod skipdb;

pub use hasher::Hasher;
pub use loader::{HashOpt, InputGraphError, Stats, hash_target};
pub use skipdb::{SkipDb, SkipDbError};
