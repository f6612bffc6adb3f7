// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parsing, rendering, and joining of target/artifact references.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from reference parsing and joining.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    /// The string is not of the form `<frame>+<target>`.
    #[error("invalid target reference {0:?}")]
    InvalidTarget(String),
    /// The string is not of the form `<frame>+<target>/<path>`.
    #[error("invalid artifact reference {0:?}")]
    InvalidArtifact(String),
    /// The target name contains characters outside `[a-zA-Z0-9._-]`.
    #[error("invalid target name {0:?}")]
    InvalidTargetName(String),
    /// A relative reference could not be joined against the current frame.
    #[error("cannot resolve {child:?} relative to {parent:?}")]
    JoinFailed {
        /// The reference frame being joined against.
        parent: String,
        /// The relative reference.
        child: String,
    },
}

/// A reference to a target in a build file.
///
/// At most one of `local_path`, `gh_repo`, `import_ref` is non-empty. All
/// empty means "the current build file".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Remote repository path, e.g. `github.com/foo/bar`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gh_repo: String,
    /// Git ref within `gh_repo` (tag or branch); empty means the default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// Import alias prefix, before dereferencing.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub import_ref: String,
    /// Local directory holding the build file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_path: String,
    /// The target name.
    pub target: String,
}

impl Target {
    /// Parse a target reference string.
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let plus = s
            .rfind('+')
            .ok_or_else(|| ReferenceError::InvalidTarget(s.to_string()))?;
        let (frame, name) = (&s[..plus], &s[plus + 1..]);
        if name.is_empty() || !is_valid_target_name(name) {
            return Err(ReferenceError::InvalidTargetName(name.to_string()));
        }

        let mut t = Target {
            target: name.to_string(),
            ..Target::default()
        };
        if frame.is_empty() {
            return Ok(t);
        }
        if frame == "."
            || frame == ".."
            || frame.starts_with("./")
            || frame.starts_with("../")
            || frame.starts_with('/')
        {
            t.local_path = normalize_path(frame);
            return Ok(t);
        }
        if frame.contains('/') {
            // Remote repo, optionally with a :tag suffix.
            match frame.rsplit_once(':') {
                Some((repo, tag)) if !tag.contains('/') => {
                    t.gh_repo = repo.to_string();
                    t.tag = tag.to_string();
                }
                _ => t.gh_repo = frame.to_string(),
            }
            return Ok(t);
        }
        t.import_ref = frame.to_string();
        Ok(t)
    }

    /// True if the reference points at a directory on the local host.
    #[must_use]
    pub fn is_local(&self) -> bool {
        !self.local_path.is_empty()
    }

    /// True if the reference points at a remote repository.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        !self.gh_repo.is_empty()
    }

    /// True if the reference still carries an unresolved import alias.
    #[must_use]
    pub fn is_import(&self) -> bool {
        !self.import_ref.is_empty()
    }

    /// True if the reference leaves the current build file.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.is_local_external() || self.is_remote() || self.is_import()
    }

    /// True if the reference is local but not the current build file.
    #[must_use]
    pub fn is_local_external(&self) -> bool {
        self.is_local() && self.local_path != "."
    }

    /// True if the reference names a target in the current build file.
    #[must_use]
    pub fn is_unresolved_import_reference(&self) -> bool {
        self.is_import() && self.gh_repo.is_empty() && self.local_path.is_empty()
    }

    /// The frame (everything before `+<target>`) in display form.
    fn frame(&self) -> String {
        if !self.import_ref.is_empty() {
            return self.import_ref.clone();
        }
        self.frame_canonical()
    }

    /// The frame in canonical form, ignoring any import alias.
    fn frame_canonical(&self) -> String {
        if !self.gh_repo.is_empty() {
            let repo = self.gh_repo.to_lowercase();
            if self.tag.is_empty() {
                return repo;
            }
            return format!("{}:{}", repo, self.tag.to_lowercase());
        }
        if !self.local_path.is_empty() && self.local_path != "." {
            return self.local_path.clone();
        }
        String::new()
    }

    /// The display rendering: imports keep their alias form.
    #[must_use]
    pub fn string(&self) -> String {
        format!("{}+{}", self.frame(), self.target)
    }

    /// The canonical rendering used for equality and visited keys.
    #[must_use]
    pub fn string_canonical(&self) -> String {
        format!("{}+{}", self.frame_canonical(), self.target)
    }

    /// The canonical project rendering, without the target name.
    #[must_use]
    pub fn project_canonical(&self) -> String {
        self.frame_canonical()
    }

    /// Returns a copy with the target name replaced.
    #[must_use]
    pub fn with_target(&self, name: &str) -> Self {
        let mut t = self.clone();
        t.target = name.to_string();
        t
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string())
    }
}

/// A reference to an artifact produced by a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    /// The producing target.
    pub target: Target,
    /// Path of the artifact under the target's artifact root.
    pub artifact: String,
}

impl Artifact {
    /// Parse an artifact reference string (`<target-ref>/<path>`).
    pub fn parse(s: &str) -> Result<Self, ReferenceError> {
        let plus = s
            .rfind('+')
            .ok_or_else(|| ReferenceError::InvalidArtifact(s.to_string()))?;
        let after = &s[plus + 1..];
        let Some(slash) = after.find('/') else {
            return Err(ReferenceError::InvalidArtifact(s.to_string()));
        };
        let target = Target::parse(&s[..plus + 1 + slash])?;
        let trimmed = after[slash..].trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ReferenceError::InvalidArtifact(s.to_string()));
        }
        Ok(Self {
            target,
            artifact: format!("/{trimmed}"),
        })
    }

    /// Display rendering (import form preserved).
    #[must_use]
    pub fn string(&self) -> String {
        format!("{}{}", self.target.string(), artifact_suffix(&self.artifact))
    }

    /// Canonical rendering.
    #[must_use]
    pub fn string_canonical(&self) -> String {
        format!(
            "{}{}",
            self.target.string_canonical(),
            artifact_suffix(&self.artifact)
        )
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string())
    }
}

fn artifact_suffix(artifact: &str) -> String {
    if artifact.starts_with('/') {
        artifact.to_string()
    } else {
        format!("/{artifact}")
    }
}

fn is_valid_target_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Lexically normalize a path: collapse `//` and `.` segments and resolve
/// `..` where possible, keeping a leading `./`, `../`, or `/` marker.
#[must_use]
pub fn normalize_path(p: &str) -> String {
    let absolute = p.starts_with('/');
    let explicit_relative = p.starts_with("./") || p.starts_with("../") || p == "." || p == "..";
    let mut out: Vec<&str> = Vec::new();
    let mut leading_parents = 0usize;
    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.is_empty() {
                    if !absolute {
                        leading_parents += 1;
                    }
                } else {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }

    let mut res = String::new();
    if absolute {
        res.push('/');
    } else if leading_parents > 0 {
        for _ in 0..leading_parents {
            res.push_str("../");
        }
    } else if explicit_relative {
        res.push_str("./");
    }
    res.push_str(&out.join("/"));
    if res.is_empty() {
        return ".".to_string();
    }
    if res == "./" {
        return ".".to_string();
    }
    if res.len() > 1 && res.ends_with('/') {
        res.pop();
    }
    res
}

/// Resolve `child` against the frame of `current`.
///
/// A child that is already remote, absolute-local, or still an import alias
/// passes through unchanged. A relative local child is joined onto the
/// current frame — a relative path within a remote frame stays remote.
pub fn join_references(current: &Target, child: &Target) -> Result<Target, ReferenceError> {
    if child.is_remote() || child.is_import() || child.local_path.starts_with('/') {
        return Ok(child.clone());
    }
    if !child.is_local() {
        // Same-file reference: adopt the current frame.
        let mut t = current.clone();
        t.target = child.target.clone();
        t.import_ref = String::new();
        return Ok(t);
    }

    if current.is_remote() {
        let joined = normalize_path(&format!("{}/{}", current.gh_repo, child.local_path));
        if joined.starts_with("../") {
            return Err(ReferenceError::JoinFailed {
                parent: current.string(),
                child: child.string(),
            });
        }
        let mut t = child.clone();
        t.local_path = String::new();
        t.gh_repo = joined.trim_start_matches("./").to_string();
        t.tag = current.tag.clone();
        return Ok(t);
    }

    let base = if current.is_local() {
        current.local_path.as_str()
    } else {
        "."
    };
    let mut t = child.clone();
    t.local_path = normalize_path(&format!("{base}/{}", child.local_path));
    Ok(t)
}
