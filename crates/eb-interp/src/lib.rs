// SPDX-License-Identifier: MIT OR Apache-2.0
//! The interpreter: parsed build files in, LLB graphs out.
//!
//! [`build_target`] is the entry point: it deduplicates through the
//! [`VisitedCollection`](eb_states::VisitedCollection), resolves the
//! target's build context, parses its file, resolves features, and runs a
//! [`Converter`] over the recipe. Commands that reference other targets
//! (`FROM`, `COPY +t/…`, `BUILD`, `DO`) recurse through the same entry
//! point, so every `(target, platform, args)` tuple converts exactly once
//! per build.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod converter;
mod dispatch;
mod error;
mod session;
mod waititems;

pub use converter::Converter;
pub use dispatch::CommandTag;
pub use error::InterpreterError;
pub use session::{AutoSkipChecker, BuildSession};
pub use waititems::{ImagePushItem, RunPushItem, StateSyncItem, register_outputs};

use eb_domain::Target;
use eb_platform::Platform;
use eb_states::{StateKey, TargetOutputs};
use eb_vars::Scope;
use std::sync::Arc;

/// Build (or reuse) a target's conversion.
///
/// `chain` is the caller's dependency chain, used for cycle detection.
/// `platform` is the concrete platform chosen by the caller (from an
/// explicit `--platform` or the caller's current platform); `None` uses the
/// session's native platform. `overriding` are the build args passed by the
/// caller.
pub async fn build_target(
    session: &Arc<BuildSession>,
    target: &Target,
    platform: Option<Platform>,
    overriding: Scope,
    allow_privileged: bool,
    chain: &[StateKey],
) -> Result<Arc<TargetOutputs>, InterpreterError> {
    converter::build_target_impl(session, target, platform, overriding, allow_privileged, chain)
        .await
}
