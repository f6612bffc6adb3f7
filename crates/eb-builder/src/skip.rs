// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auto-skip wiring: the input-graph hasher behind the session's checker.

use async_trait::async_trait;
use eb_domain::Target;
use eb_inputgraph::{HashOpt, SkipDb, hash_target};
use eb_interp::AutoSkipChecker;
use eb_vars::{DefaultArgs, Scope};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// An [`AutoSkipChecker`] backed by [`hash_target`] and the [`SkipDb`].
///
/// Hashing failures disable skipping for that target rather than failing
/// the build: auto-skip is an optimization, not a gate.
pub struct InputGraphSkipChecker {
    db: Arc<SkipDb>,
    local_root: PathBuf,
    builtin_args: DefaultArgs,
    ci: bool,
    push: bool,
}

impl InputGraphSkipChecker {
    /// A checker over a skip database.
    #[must_use]
    pub fn new(
        db: Arc<SkipDb>,
        local_root: PathBuf,
        builtin_args: DefaultArgs,
        ci: bool,
        push: bool,
    ) -> Self {
        Self {
            db,
            local_root,
            builtin_args,
            ci,
            push,
        }
    }

    /// Compute and record a target's fingerprint after a successful build.
    pub async fn record(&self, target: &Target, overriding: &Scope) {
        match self.fingerprint(target, overriding).await {
            Some(hex) => {
                if let Err(err) = self.db.add(&hex) {
                    warn!(target: "eb.builder", %err, "failed to record auto-skip entry");
                }
            }
            None => {
                debug!(
                    target: "eb.builder",
                    target = %target.string_canonical(),
                    "target is not hashable; not recorded"
                );
            }
        }
    }

    async fn fingerprint(&self, target: &Target, overriding: &Scope) -> Option<String> {
        let result = hash_target(HashOpt {
            target: target.clone(),
            local_root: self.local_root.clone(),
            overriding: overriding.clone(),
            builtin_args: self.builtin_args.clone(),
            ci: self.ci,
            push: self.push,
        })
        .await;
        match result {
            Ok((digest, _)) => Some(hex::encode(digest)),
            Err(err) => {
                debug!(target: "eb.builder", %err, "auto-skip hashing failed");
                None
            }
        }
    }
}

#[async_trait]
impl AutoSkipChecker for InputGraphSkipChecker {
    async fn should_skip(&self, target: &Target, overriding: &Scope) -> bool {
        match self.fingerprint(target, overriding).await {
            Some(hex) => {
                let skip = self.db.exists(&hex);
                if skip {
                    debug!(
                        target: "eb.builder",
                        target = %target.string_canonical(),
                        "fingerprint unchanged; skipping"
                    );
                }
                skip
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, rel: &str, contents: &str) {
        std::fs::write(dir.join(rel), contents).expect("write");
    }

    #[tokio::test]
    async fn skips_only_after_recording() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo hi\n",
        );
        let db = Arc::new(SkipDb::open(&dir.path().join("skip.json")).expect("open db"));
        let checker = InputGraphSkipChecker::new(
            Arc::clone(&db),
            dir.path().to_path_buf(),
            DefaultArgs::default(),
            false,
            false,
        );
        let target = Target::parse("+build").expect("target");

        assert!(!checker.should_skip(&target, &Scope::new()).await);
        checker.record(&target, &Scope::new()).await;
        assert!(checker.should_skip(&target, &Scope::new()).await);
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn source_changes_invalidate_the_skip() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo hi\n",
        );
        let db = Arc::new(SkipDb::open(&dir.path().join("skip.json")).expect("open db"));
        let checker = InputGraphSkipChecker::new(
            Arc::clone(&db),
            dir.path().to_path_buf(),
            DefaultArgs::default(),
            false,
            false,
        );
        let target = Target::parse("+build").expect("target");
        checker.record(&target, &Scope::new()).await;

        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo changed\n",
        );
        assert!(!checker.should_skip(&target, &Scope::new()).await);
    }

    #[tokio::test]
    async fn unhashable_targets_never_skip() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    ARG v=$(dynamic)\n",
        );
        let db = Arc::new(SkipDb::open(&dir.path().join("skip.json")).expect("open db"));
        let checker = InputGraphSkipChecker::new(
            Arc::clone(&db),
            dir.path().to_path_buf(),
            DefaultArgs::default(),
            false,
            false,
        );
        let target = Target::parse("+build").expect("target");
        checker.record(&target, &Scope::new()).await;
        assert!(db.is_empty(), "nothing recorded for unhashable targets");
        assert!(!checker.should_skip(&target, &Scope::new()).await);
    }
}
