// SPDX-License-Identifier: MIT OR Apache-2.0
//! Git metadata discovered for a build context.

use serde::{Deserialize, Serialize};

/// Metadata about the git repository a build context lives in.
///
/// All fields are best-effort: a context outside any repository produces a
/// default (empty) record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetadata {
    /// Full commit hash of `HEAD`.
    pub hash: String,
    /// Abbreviated commit hash.
    pub short_hash: String,
    /// Branches pointing at `HEAD`, most relevant first.
    pub branch: Vec<String>,
    /// Tags pointing at `HEAD`.
    pub tags: Vec<String>,
    /// Refs pointing at `HEAD` (for the `git-refs` feature).
    pub refs: Vec<String>,
    /// URL of the `origin` remote, credentials included if configured.
    pub remote_url: String,
    /// Committer timestamp of `HEAD`, unix seconds as a string.
    pub committer_timestamp: String,
    /// Author timestamp of `HEAD`, unix seconds as a string.
    pub author_timestamp: String,
    /// Author name of `HEAD`.
    pub author_name: String,
    /// Author email of `HEAD`.
    pub author_email: String,
    /// Co-author lines of `HEAD`'s message.
    pub co_authors: Vec<String>,
    /// Relative path of the build context inside the repository.
    pub rel_dir: String,
    /// When set, the branch (not the target tag) feeds the tag builtins.
    /// Used by CI triggers acting on a branch.
    pub branch_override_tag_arg: bool,
}

impl GitMetadata {
    /// The first branch name, or empty.
    #[must_use]
    pub fn main_branch(&self) -> &str {
        self.branch.first().map(String::as_str).unwrap_or_default()
    }

    /// The first tag name, or empty.
    #[must_use]
    pub fn main_tag(&self) -> &str {
        self.tags.first().map(String::as_str).unwrap_or_default()
    }
}
