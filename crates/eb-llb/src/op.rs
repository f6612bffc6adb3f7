// SPDX-License-Identifier: MIT OR Apache-2.0
//! LLB operation payloads.

use serde::{Deserialize, Serialize};

/// Network mode for a run operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// The engine's default sandbox network.
    #[default]
    Sandbox,
    /// No network access.
    None,
    /// The host's network.
    Host,
}

/// Sharing mode for cache mounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSharingMode {
    /// One writer at a time; others block.
    #[default]
    Locked,
    /// Concurrent use of the same cache.
    Shared,
    /// Every build gets its own copy.
    Private,
}

/// What a mount attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    /// A persistent cache directory, keyed by `id`.
    Cache {
        /// Cache key; global caches share it across build files.
        id: String,
        /// Sharing mode.
        sharing: CacheSharingMode,
        /// Folder mode bits, octal string.
        mode: String,
    },
    /// A secret file, keyed by `id`.
    Secret {
        /// Secret name in the session's secret store.
        id: String,
    },
    /// An SSH agent socket.
    Ssh,
    /// A tmpfs scratch directory.
    Tmpfs,
    /// An input state mounted read-only (input index into the node inputs).
    Layer {
        /// Index into the node's inputs.
        input: usize,
    },
}

/// One mount of a run operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount destination inside the container.
    pub target: String,
    /// What is mounted there.
    pub kind: MountKind,
}

/// Payload of a run operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOp {
    /// The command, exec form.
    pub command: Vec<String>,
    /// Environment variables, `K=V` form, sorted.
    pub env: Vec<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    /// User to run as.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Mounts, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
    /// Secret names made available.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,
    /// Network mode.
    #[serde(default)]
    pub network: NetworkMode,
    /// Privileged execution.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    /// SSH agent forwarding.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ssh: bool,
    /// AWS credential forwarding.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aws: bool,
    /// OIDC provider spec for credential forwarding.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oidc: String,
    /// Skip the cache for this operation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_cache: bool,
}

/// Payload of a copy operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOp {
    /// Source paths within the source input.
    pub src: Vec<String>,
    /// Destination path.
    pub dest: String,
    /// Copy directories as directories rather than their contents.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dir_copy: bool,
    /// Ownership to apply, `user:group`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chown: String,
    /// Mode to apply, octal string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chmod: String,
    /// Keep source timestamps.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep_ts: bool,
    /// Keep source ownership.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep_own: bool,
    /// Do not follow symlinks.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub symlink_no_follow: bool,
    /// Emit the engine's link flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub link: bool,
}

/// An LLB operation payload.
///
/// Source operations (`Image`, `Local`, `Git`, `Scratch`) have no inputs;
/// the rest take their inputs from the node that carries them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// A registry image source.
    Image {
        /// Image reference, e.g. `alpine:3.18`.
        reference: String,
        /// Digest pin, once resolved by the meta resolver.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        resolved_digest: String,
    },
    /// A local build-context source.
    Local {
        /// Context name (session key).
        name: String,
        /// Include patterns, when `use-copy-include-patterns` is active.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        include_patterns: Vec<String>,
        /// Exclude patterns from the resolved ignore list.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclude_patterns: Vec<String>,
    },
    /// A git clone source.
    Git {
        /// Remote URL.
        url: String,
        /// Git ref to check out.
        reference: String,
        /// Keep file timestamps.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        keep_ts: bool,
    },
    /// The empty filesystem.
    Scratch,
    /// Run a command on input 0.
    Run(RunOp),
    /// Copy from input 1 (or the context) into input 0.
    Copy(CopyOp),
    /// Create a directory.
    Mkdir {
        /// Directory path.
        path: String,
        /// Mode bits, octal string.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        mode: String,
    },
    /// Create a file with contents.
    Mkfile {
        /// File path.
        path: String,
        /// Mode bits, octal string.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        mode: String,
        /// File contents.
        contents: Vec<u8>,
    },
    /// Merge all inputs, later inputs winning.
    Merge,
    /// The difference between input 0 and input 1.
    Diff,
}

impl Op {
    /// A short human label for progress display.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Op::Image { reference, .. } => format!("image {reference}"),
            Op::Local { name, .. } => format!("local {name}"),
            Op::Git { url, .. } => format!("git {url}"),
            Op::Scratch => "scratch".to_string(),
            Op::Run(run) => format!("run {}", run.command.join(" ")),
            Op::Copy(copy) => format!("copy {} -> {}", copy.src.join(" "), copy.dest),
            Op::Mkdir { path, .. } => format!("mkdir {path}"),
            Op::Mkfile { path, .. } => format!("mkfile {path}"),
            Op::Merge => "merge".to_string(),
            Op::Diff => "diff".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_is_stable() {
        let op = Op::Run(RunOp {
            command: vec!["/bin/sh".to_string(), "-c".to_string(), "make".to_string()],
            env: vec!["A=1".to_string()],
            ..RunOp::default()
        });
        let a = serde_json::to_string(&op).expect("serialize");
        let b = serde_json::to_string(&op).expect("serialize");
        assert_eq!(a, b);
        let back: Op = serde_json::from_str(&a).expect("deserialize");
        assert_eq!(back, op);
    }

    #[test]
    fn labels_are_descriptive() {
        assert_eq!(
            Op::Image {
                reference: "alpine:3.18".to_string(),
                resolved_digest: String::new()
            }
            .label(),
            "image alpine:3.18"
        );
        assert!(Op::Scratch.label().contains("scratch"));
    }
}
