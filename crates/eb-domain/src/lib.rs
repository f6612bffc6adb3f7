// SPDX-License-Identifier: MIT OR Apache-2.0
//! Target and artifact references.
//!
//! A target reference names a recipe in a build file: local
//! (`./services/api+build`), remote (`github.com/foo/bar:v1.2.3+build`),
//! imported (`api+build` after `IMPORT ./services/api AS api`), or in the
//! current file (`+build`). An artifact reference is a target reference plus
//! a path under that target's artifact root (`+build/out/bin`).
//!
//! Two references denote the same target iff their canonical renderings are
//! byte-equal; [`Target::string_canonical`] is that rendering.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod git;
mod import;
mod reference;

pub use git::GitMetadata;
pub use import::{DerefedRef, ImportTracker, ImportTrackerError};
pub use reference::{
    Artifact, ReferenceError, Target, join_references, normalize_path,
};
