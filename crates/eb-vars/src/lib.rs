// SPDX-License-Identifier: MIT OR Apache-2.0
//! Variable scopes, builtin ARGs, and `$`-expansion.
//!
//! A [`Scope`] is a flat name→value mapping where each entry is either
//! merely *declared* or also *active* (bound in the current execution
//! context). A [`Collection`] layers scopes the way the interpreter needs
//! them: builtins, CLI overrides, globals, and a frame per target or
//! function invocation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builtin;
mod collection;
mod expand;
pub mod reserved;
mod scope;

pub use builtin::{
    DefaultArgs, builtin_args, docker_tag_safe, git_project_name, set_locally, set_platform_args,
};
pub use collection::{Collection, CollectionOpt, VarsError};
pub use expand::{ExpandError, ExpandSegment, expand_lenient, expand_strict, parse_expansion};
pub use scope::{Scope, ScopeOpts, combine_scopes};
