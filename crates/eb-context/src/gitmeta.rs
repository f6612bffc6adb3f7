// SPDX-License-Identifier: MIT OR Apache-2.0
//! Git metadata discovery via the git binary.

use eb_domain::GitMetadata;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Discover git metadata for a directory.
///
/// Returns `None` when the directory is not inside a git repository or the
/// git binary is unavailable. Individual fields are best-effort.
pub async fn detect_git_metadata(dir: &Path) -> Option<GitMetadata> {
    let hash = run_git(dir, &["rev-parse", "HEAD"]).await?;

    let short_hash = run_git(dir, &["rev-parse", "--short", "HEAD"])
        .await
        .unwrap_or_default();
    let mut branch = Vec::new();
    if let Some(b) = run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await
        && b != "HEAD"
    {
        branch.push(b);
    }
    let tags = run_git_lines(dir, &["tag", "--points-at", "HEAD"]).await;
    let refs = run_git_lines(
        dir,
        &["for-each-ref", "--points-at", "HEAD", "--format=%(refname:short)"],
    )
    .await;
    let remote_url = run_git(dir, &["config", "remote.origin.url"])
        .await
        .unwrap_or_default();
    let committer_timestamp = run_git(dir, &["log", "-1", "--format=%ct"])
        .await
        .unwrap_or_default();
    let author_timestamp = run_git(dir, &["log", "-1", "--format=%at"])
        .await
        .unwrap_or_default();
    let author_name = run_git(dir, &["log", "-1", "--format=%an"])
        .await
        .unwrap_or_default();
    let author_email = run_git(dir, &["log", "-1", "--format=%ae"])
        .await
        .unwrap_or_default();
    let co_authors = run_git_lines(dir, &["log", "-1", "--format=%(trailers:key=Co-authored-by,valueonly)"])
        .await;
    let rel_dir = run_git(dir, &["rev-parse", "--show-prefix"])
        .await
        .unwrap_or_default();

    Some(GitMetadata {
        hash,
        short_hash,
        branch,
        tags,
        refs,
        remote_url,
        committer_timestamp,
        author_timestamp,
        author_name,
        author_email,
        co_authors,
        rel_dir: rel_dir.trim_end_matches('/').to_string(),
        branch_override_tag_arg: false,
    })
}

async fn run_git(dir: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .ok()?;
    if !out.status.success() {
        debug!(target: "eb.context", ?args, code = ?out.status.code(), "git command failed");
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

async fn run_git_lines(dir: &Path, args: &[&str]) -> Vec<String> {
    match run_git(dir, args).await {
        Some(out) => out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) {
        let status = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn returns_none_outside_a_repository() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Guard against the tempdir being nested inside a repo.
        if StdCommand::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir.path())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
        {
            return;
        }
        assert!(detect_git_metadata(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn detects_commit_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        git(dir.path(), &["init", "-q", "-b", "main"]);
        git(dir.path(), &["config", "user.name", "tester"]);
        git(dir.path(), &["config", "user.email", "tester@example.com"]);
        std::fs::write(dir.path().join("f"), "data").expect("write");
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "-qm", "initial"]);
        git(dir.path(), &["tag", "v1.0"]);

        let meta = detect_git_metadata(dir.path()).await.expect("metadata");
        assert_eq!(meta.hash.len(), 40);
        assert!(meta.hash.starts_with(&meta.short_hash));
        assert_eq!(meta.branch, vec!["main"]);
        assert_eq!(meta.tags, vec!["v1.0"]);
        assert_eq!(meta.author_name, "tester");
        assert_eq!(meta.author_email, "tester@example.com");
        assert!(!meta.committer_timestamp.is_empty());
    }
}
