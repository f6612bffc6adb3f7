// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resolution of build contexts for local and remote references.

use crate::excludes::{ExcludesError, read_excludes};
use crate::gitmeta::detect_git_metadata;
use crate::{BUILD_FILE_NAME, LEGACY_BUILD_FILE_NAME};
use eb_domain::{GitMetadata, Target};
use eb_sync::SyncCache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from context resolution.
#[derive(Debug, Error, Clone)]
pub enum ContextError {
    /// No build file exists in the context directory.
    #[error("no build file found in {0} (expected {BUILD_FILE_NAME} or {LEGACY_BUILD_FILE_NAME})")]
    NoBuildFile(String),
    /// Ignore-file resolution failed.
    #[error(transparent)]
    Excludes(#[from] ExcludesError),
    /// A remote repository could not be cloned.
    #[error("git clone of {repo} failed: {reason}")]
    CloneFailed {
        /// The repository that failed to clone.
        repo: String,
        /// The git error text.
        reason: String,
    },
    /// The reference cannot be resolved to a context (e.g. an import that
    /// was never dereferenced).
    #[error("cannot resolve a build context for {0}")]
    Unresolvable(String),
    /// Filesystem error while inspecting the context.
    #[error("context io error: {0}")]
    Io(String),
}

/// A resolved build context.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Root directory of the source tree.
    pub root: PathBuf,
    /// Path of the build file inside `root`.
    pub build_file_path: PathBuf,
    /// The resolved exclusion list.
    pub excludes: Vec<String>,
    /// Git metadata of the tree, if it is inside a repository.
    pub git_meta: Option<GitMetadata>,
}

/// Resolves references to build contexts, once per canonical reference.
pub struct ContextResolver {
    local_root: PathBuf,
    clone_root: PathBuf,
    no_implicit_ignore: bool,
    use_docker_ignore: bool,
    cache: SyncCache<String, Arc<BuildContext>>,
}

impl ContextResolver {
    /// Create a resolver.
    ///
    /// `local_root` anchors relative local references (usually the cwd);
    /// `clone_root` receives remote clones (usually under the installation
    /// directory).
    #[must_use]
    pub fn new(local_root: PathBuf, clone_root: PathBuf) -> Self {
        Self {
            local_root,
            clone_root,
            no_implicit_ignore: false,
            use_docker_ignore: false,
            cache: SyncCache::new(),
        }
    }

    /// Toggle the `no-implicit-ignore` behavior.
    #[must_use]
    pub fn with_no_implicit_ignore(mut self, value: bool) -> Self {
        self.no_implicit_ignore = value;
        self
    }

    /// Toggle the `.dockerignore` fallback.
    #[must_use]
    pub fn with_docker_ignore(mut self, value: bool) -> Self {
        self.use_docker_ignore = value;
        self
    }

    /// Resolve the context for a target reference. Concurrent calls for the
    /// same canonical reference share one resolution.
    pub async fn resolve(&self, target: &Target) -> Result<Arc<BuildContext>, ContextError> {
        let key = target.project_canonical();
        let target = target.clone();
        self.cache
            .do_call(key, || async move {
                if target.is_remote() {
                    self.resolve_remote(&target).await
                } else if target.is_import() {
                    Err(ContextError::Unresolvable(target.string()))
                } else {
                    self.resolve_local(&target).await
                }
            })
            .await
    }

    async fn resolve_local(&self, target: &Target) -> Result<Arc<BuildContext>, ContextError> {
        let rel = if target.local_path.is_empty() {
            "."
        } else {
            target.local_path.as_str()
        };
        let root = normalize_join(&self.local_root, rel);
        self.load_dir(root, &target.string()).await
    }

    async fn resolve_remote(&self, target: &Target) -> Result<Arc<BuildContext>, ContextError> {
        let repo = target.gh_repo.clone();
        let url = format!("https://{repo}.git");
        let dest = self.clone_root.join(sanitize(&format!(
            "{repo}@{}",
            if target.tag.is_empty() { "HEAD" } else { &target.tag }
        )));

        if !dest.join(".git").exists() {
            info!(target: "eb.context", %repo, tag = %target.tag, "cloning remote context");
            tokio::fs::create_dir_all(&dest)
                .await
                .map_err(|e| ContextError::Io(e.to_string()))?;

            let mut cmd = Command::new("git");
            cmd.arg("clone").arg("--depth").arg("1");
            if !target.tag.is_empty() {
                cmd.arg("--branch").arg(&target.tag);
            }
            cmd.arg(&url).arg(&dest);
            let out = cmd
                .output()
                .await
                .map_err(|e| ContextError::Io(e.to_string()))?;
            if !out.status.success() {
                return Err(ContextError::CloneFailed {
                    repo,
                    reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
                });
            }
        } else {
            debug!(target: "eb.context", %repo, "reusing cached clone");
        }

        self.load_dir(dest, &target.string()).await
    }

    async fn load_dir(
        &self,
        root: PathBuf,
        display_ref: &str,
    ) -> Result<Arc<BuildContext>, ContextError> {
        let build_file_path = [BUILD_FILE_NAME, LEGACY_BUILD_FILE_NAME]
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.exists())
            .ok_or_else(|| ContextError::NoBuildFile(display_ref.to_string()))?;

        let excludes = read_excludes(&root, self.no_implicit_ignore, self.use_docker_ignore)?;
        let git_meta = detect_git_metadata(&root).await;

        Ok(Arc::new(BuildContext {
            root,
            build_file_path,
            excludes,
            git_meta,
        }))
    }
}

fn normalize_join(base: &Path, rel: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    if rel.starts_with('/') {
        return PathBuf::from(rel);
    }
    for seg in rel.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_build_file(dir: &Path) {
        std::fs::write(dir.join(BUILD_FILE_NAME), "VERSION 0.7\n").expect("write build file");
    }

    #[tokio::test]
    async fn resolves_local_contexts() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_build_file(dir.path());
        std::fs::write(dir.path().join(".earthignore"), "out/\n").expect("write ignore");

        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));
        let target = Target::parse("+build").expect("target");
        let ctx = resolver.resolve(&target).await.expect("resolve");

        assert_eq!(ctx.root, dir.path());
        assert_eq!(ctx.build_file_path, dir.path().join(BUILD_FILE_NAME));
        assert!(ctx.excludes.contains(&"out".to_string()));
        assert!(ctx.excludes.contains(&"Earthfile".to_string()));
    }

    #[tokio::test]
    async fn resolves_subdirectory_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sub = dir.path().join("services/api");
        std::fs::create_dir_all(&sub).expect("mkdir");
        write_build_file(&sub);

        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));
        let target = Target::parse("./services/api+build").expect("target");
        let ctx = resolver.resolve(&target).await.expect("resolve");
        assert_eq!(ctx.root, sub);
    }

    #[tokio::test]
    async fn missing_build_file_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));
        let target = Target::parse("+build").expect("target");
        let err = resolver.resolve(&target).await.unwrap_err();
        assert!(matches!(err, ContextError::NoBuildFile(_)));
    }

    #[tokio::test]
    async fn legacy_build_file_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(LEGACY_BUILD_FILE_NAME), "VERSION 0.5\n")
            .expect("write legacy file");
        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));
        let ctx = resolver
            .resolve(&Target::parse("+t").expect("target"))
            .await
            .expect("resolve");
        assert_eq!(ctx.build_file_path, dir.path().join(LEGACY_BUILD_FILE_NAME));
    }

    #[tokio::test]
    async fn duplicate_ignore_files_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_build_file(dir.path());
        std::fs::write(dir.path().join(".earthignore"), "a\n").expect("write");
        std::fs::write(dir.path().join(".earthbuildignore"), "b\n").expect("write");

        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));
        let err = resolver
            .resolve(&Target::parse("+t").expect("target"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContextError::Excludes(ExcludesError::DuplicateIgnoreFile)
        ));
    }

    #[tokio::test]
    async fn contexts_are_cached_per_reference() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_build_file(dir.path());
        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));

        let a = resolver
            .resolve(&Target::parse("+a").expect("target"))
            .await
            .expect("resolve");
        // Same frame, different target name: same context entry.
        let b = resolver
            .resolve(&Target::parse("+b").expect("target"))
            .await
            .expect("resolve");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unresolved_imports_cannot_have_contexts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver =
            ContextResolver::new(dir.path().to_path_buf(), dir.path().join("clones"));
        let err = resolver
            .resolve(&Target::parse("alias+t").expect("target"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Unresolvable(_)));
    }
}
