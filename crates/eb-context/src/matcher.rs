// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered exclude-pattern matching.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use std::path::Path;

struct Pattern {
    exact: GlobMatcher,
    subtree: GlobMatcher,
    negate: bool,
}

/// Matches paths against an ordered exclude-pattern list.
///
/// A pattern excludes the named path and everything under it; a leading `!`
/// re-includes. The last matching pattern wins, so
/// `["out", "!out/keep"]` excludes `out/` except `out/keep`.
pub struct ExcludeMatcher {
    patterns: Vec<Pattern>,
}

impl ExcludeMatcher {
    /// Compile an exclude list (as returned by
    /// [`read_excludes`](crate::read_excludes)).
    pub fn new(excludes: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(excludes.len());
        for raw in excludes {
            let (negate, text) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let text = text.trim_end_matches('/');
            if text.is_empty() {
                continue;
            }
            let exact = Glob::new(text)
                .with_context(|| format!("invalid exclude pattern {raw:?}"))?
                .compile_matcher();
            let subtree = Glob::new(&format!("{text}/**"))
                .with_context(|| format!("invalid exclude pattern {raw:?}"))?
                .compile_matcher();
            patterns.push(Pattern {
                exact,
                subtree,
                negate,
            });
        }
        Ok(Self { patterns })
    }

    /// True if `path` (relative to the context root) is excluded.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        let mut excluded = false;
        for pattern in &self.patterns {
            if pattern.exact.is_match(path) || pattern.subtree.is_match(path) {
                excluded = !pattern.negate;
            }
        }
        excluded
    }

    /// Convenience wrapper for string paths.
    #[must_use]
    pub fn is_excluded_str(&self, path: &str) -> bool {
        self.is_excluded(Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> ExcludeMatcher {
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        ExcludeMatcher::new(&patterns).expect("compile matcher")
    }

    #[test]
    fn excludes_named_paths_and_subtrees() {
        let m = matcher(&["out", "*.log"]);
        assert!(m.is_excluded_str("out"));
        assert!(m.is_excluded_str("out/nested/file"));
        assert!(m.is_excluded_str("build.log"));
        assert!(!m.is_excluded_str("src/main.rs"));
    }

    #[test]
    fn trailing_slash_patterns_match_directories() {
        let m = matcher(&["target/"]);
        assert!(m.is_excluded_str("target"));
        assert!(m.is_excluded_str("target/debug/bin"));
    }

    #[test]
    fn negation_reincludes_last_match_wins() {
        let m = matcher(&["out", "!out/keep"]);
        assert!(m.is_excluded_str("out/trash"));
        assert!(!m.is_excluded_str("out/keep"));
        assert!(!m.is_excluded_str("out/keep/file"));
    }

    #[test]
    fn empty_list_excludes_nothing() {
        let m = matcher(&[]);
        assert!(!m.is_excluded_str("anything"));
    }

    #[test]
    fn invalid_patterns_error() {
        let patterns = vec!["[".to_string()];
        assert!(ExcludeMatcher::new(&patterns).is_err());
    }
}
