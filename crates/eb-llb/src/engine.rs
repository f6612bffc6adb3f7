// SPDX-License-Identifier: MIT OR Apache-2.0
//! The build-engine client interface.

use crate::image::ImageConfig;
use crate::request::SolveRequest;
use crate::state::{Digest, State};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the build engine, classified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A command exited non-zero.
    #[error("command exited with code {0}")]
    ExitCode(u32),
    /// A process was killed by the OOM killer.
    #[error("process was killed by the OOM killer")]
    OomKilled,
    /// A referenced file was not found (checksum failure).
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// A git operation inside the engine failed.
    #[error("git failure: {0}")]
    Git(String),
    /// The solve was cancelled.
    #[error("solve cancelled")]
    Cancelled,
    /// Anything else.
    #[error("{0}")]
    Unknown(String),
}

/// Classify raw engine error text into an [`EngineError`].
///
/// Exit codes are parsed from the text; values outside 0–255 indicate an
/// OOM kill.
#[must_use]
pub fn classify_engine_error(text: &str) -> EngineError {
    if let Some(code) = parse_exit_code(text) {
        if code > 255 {
            return EngineError::OomKilled;
        }
        return EngineError::ExitCode(code as u32);
    }
    let lower = text.to_ascii_lowercase();
    if lower.contains("no such file or directory") || lower.contains("failed to calculate checksum")
    {
        return EngineError::FileNotFound(text.to_string());
    }
    if lower.contains("git") {
        return EngineError::Git(text.to_string());
    }
    if lower.contains("context canceled") || lower.contains("cancelled") {
        return EngineError::Cancelled;
    }
    EngineError::Unknown(text.to_string())
}

fn parse_exit_code(text: &str) -> Option<u64> {
    let idx = text.find("exit code")?;
    let rest = text[idx + "exit code".len()..].trim_start_matches([':', ' ']);
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Options for image config resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveImageOpt {
    /// Platform string to resolve for; empty uses the engine default.
    pub platform: String,
}

/// A resolved base-image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImage {
    /// The possibly-canonicalized reference.
    pub reference: String,
    /// The manifest digest.
    pub digest: Digest,
    /// The image config.
    pub config: ImageConfig,
}

/// A status event from a running solve.
///
/// Vertex events are structural and must never be dropped; progress and log
/// events are advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    /// A vertex started (or was found cached).
    VertexStarted {
        /// The vertex digest.
        digest: Digest,
        /// Human label.
        name: String,
        /// True when served from cache.
        cached: bool,
    },
    /// A vertex completed.
    VertexCompleted {
        /// The vertex digest.
        digest: Digest,
        /// Error text; empty on success.
        error: String,
    },
    /// Byte-level progress of a vertex.
    Progress {
        /// The vertex digest.
        digest: Digest,
        /// What is progressing (e.g. a layer id).
        id: String,
        /// Bytes done.
        current: u64,
        /// Total bytes, when known.
        total: u64,
    },
    /// A log line from a vertex.
    Log {
        /// The vertex digest.
        digest: Digest,
        /// Raw log data.
        data: Vec<u8>,
    },
}

impl SolveStatus {
    /// True for events that must never be dropped under back-pressure.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SolveStatus::VertexStarted { .. } | SolveStatus::VertexCompleted { .. }
        )
    }
}

/// The outcome of a solve.
#[derive(Debug, Clone, Default)]
pub struct SolveResult {
    /// Per-export image references (ref key → image name).
    pub image_refs: BTreeMap<String, String>,
    /// Per-export artifact directories (ref key → host path).
    pub artifact_dirs: BTreeMap<String, String>,
    /// Pass-through metadata from the exports.
    pub metadata: BTreeMap<String, Vec<u8>>,
}

/// The result of probing a command against a state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// The command's exit code.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
}

/// The container build engine, seen from the converter.
///
/// Implementations must deliver status events for a given vertex in order;
/// no cross-vertex ordering is guaranteed.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    /// Solve a composed request, streaming status into `status`.
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolveResult, EngineError>;

    /// Resolve a base image's config.
    async fn resolve_image_config(
        &self,
        reference: &str,
        opt: ResolveImageOpt,
    ) -> Result<ResolvedImage, EngineError>;

    /// Run a command against a state and capture its exit code and stdout.
    ///
    /// Used for `IF` conditions, `FOR` expressions, and `$(…)` shell-outs.
    /// Filesystem mutations of the probe are discarded.
    async fn exec_probe(&self, state: &State, command: &str) -> Result<ProbeResult, EngineError>;

    /// Push a previously-solved image to its registry.
    ///
    /// Called by wait-block items after their enclosing block closes.
    async fn push_image(&self, image_name: &str, insecure: bool) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_exit_codes() {
        assert_eq!(
            classify_engine_error("process did not complete successfully: exit code: 2"),
            EngineError::ExitCode(2)
        );
        assert_eq!(
            classify_engine_error("run failed: exit code 137"),
            EngineError::ExitCode(137)
        );
    }

    #[test]
    fn out_of_range_exit_codes_mean_oom() {
        assert_eq!(
            classify_engine_error("exit code: 512"),
            EngineError::OomKilled
        );
    }

    #[test]
    fn classifies_file_not_found() {
        assert!(matches!(
            classify_engine_error("failed to calculate checksum of ref: \"/x\" no such file or directory"),
            EngineError::FileNotFound(_)
        ));
    }

    #[test]
    fn classifies_git_failures() {
        assert!(matches!(
            classify_engine_error("git ls-remote failed for https://example.com"),
            EngineError::Git(_)
        ));
    }

    #[test]
    fn classifies_cancellation() {
        assert_eq!(
            classify_engine_error("context canceled"),
            EngineError::Cancelled
        );
    }

    #[test]
    fn unknown_text_is_unknown() {
        assert!(matches!(
            classify_engine_error("something odd happened"),
            EngineError::Unknown(_)
        ));
    }

    #[test]
    fn structural_events() {
        assert!(
            SolveStatus::VertexStarted {
                digest: "d".to_string(),
                name: "n".to_string(),
                cached: false
            }
            .is_structural()
        );
        assert!(
            !SolveStatus::Progress {
                digest: "d".to_string(),
                id: "layer".to_string(),
                current: 1,
                total: 2
            }
            .is_structural()
        );
    }
}
