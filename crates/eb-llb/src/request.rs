// SPDX-License-Identifier: MIT OR Apache-2.0
//! The solve request handed to the build engine.

use crate::state::{Digest, SerializedNode, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cache import/export option entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptionEntry {
    /// Entry type: `registry` or `inline`.
    pub kind: String,
    /// Attributes (e.g. `ref`, `mode`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
}

impl CacheOptionEntry {
    /// A registry cache entry for `reference`.
    #[must_use]
    pub fn registry(reference: &str) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("ref".to_string(), reference.to_string());
        Self {
            kind: "registry".to_string(),
            attrs,
        }
    }

    /// A registry cache export in max mode.
    #[must_use]
    pub fn registry_max(reference: &str) -> Self {
        let mut entry = Self::registry(reference);
        entry
            .attrs
            .insert("mode".to_string(), "max".to_string());
        entry
    }

    /// An inline cache entry (layer hints embedded in pushed images).
    #[must_use]
    pub fn inline() -> Self {
        Self {
            kind: "inline".to_string(),
            attrs: BTreeMap::new(),
        }
    }
}

/// One export of a solve: a graph root plus routing metadata.
///
/// The metadata names the export kind: `export-image` entries are routed to
/// the image callback, `export-dir` to the artifact callback, and
/// `final-artifact` to the root artifact destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Reference key (`image-0`, `dir-1`, …).
    pub ref_key: String,
    /// Digest of the graph root to export.
    pub root: Digest,
    /// Routing metadata, keyed `ref/<ref_key>/<field>`.
    pub metadata: BTreeMap<String, Vec<u8>>,
}

/// The composed request handed to [`BuildEngine::solve`](crate::BuildEngine::solve).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Every node of the graph, inputs before dependents.
    pub nodes: Vec<SerializedNode>,
    /// Exports to materialize.
    pub exports: Vec<ExportEntry>,
    /// Cache imports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_imports: Vec<CacheOptionEntry>,
    /// Cache exports (at most one max-mode, one normal-mode, one inline).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_exports: Vec<CacheOptionEntry>,
    /// Local directories the engine may read, name → absolute path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub local_dirs: BTreeMap<String, String>,
    /// Session secrets, name → value. Never serialized.
    #[serde(skip)]
    pub secrets: BTreeMap<String, String>,
    /// Whether privileged operations are permitted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_privileged: bool,
}

impl SolveRequest {
    /// Build a request from the given root states, merging their graphs and
    /// deduplicating shared nodes.
    #[must_use]
    pub fn from_states(roots: &[&State]) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut nodes = Vec::new();
        for root in roots {
            for node in root.collect_nodes() {
                if seen.insert(node.digest.clone()) {
                    nodes.push(node);
                }
            }
        }
        Self {
            nodes,
            ..Self::default()
        }
    }

    /// Find a node by digest.
    #[must_use]
    pub fn node(&self, digest: &str) -> Option<&SerializedNode> {
        self.nodes.iter().find(|n| n.digest == digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;
    use eb_platform::Platform;

    fn image(name: &str) -> State {
        State::source(
            Op::Image {
                reference: name.to_string(),
                resolved_digest: String::new(),
            },
            Platform::new("linux", "amd64"),
            "+t",
        )
    }

    #[test]
    fn from_states_merges_and_deduplicates() {
        let base = image("alpine");
        let a = base.append(
            Op::Mkdir {
                path: "/a".to_string(),
                mode: String::new(),
            },
            Platform::new("linux", "amd64"),
            "+t",
        );
        let b = base.append(
            Op::Mkdir {
                path: "/b".to_string(),
                mode: String::new(),
            },
            Platform::new("linux", "amd64"),
            "+t",
        );

        let req = SolveRequest::from_states(&[&a, &b]);
        assert_eq!(req.nodes.len(), 3, "base is shared");
        assert!(req.node(&a.digest()).is_some());
        assert!(req.node(&b.digest()).is_some());
    }

    #[test]
    fn cache_entries() {
        let imp = CacheOptionEntry::registry("reg.example.com/cache:latest");
        assert_eq!(imp.kind, "registry");
        assert_eq!(
            imp.attrs.get("ref").map(String::as_str),
            Some("reg.example.com/cache:latest")
        );

        let max = CacheOptionEntry::registry_max("r/c");
        assert_eq!(max.attrs.get("mode").map(String::as_str), Some("max"));

        assert_eq!(CacheOptionEntry::inline().kind, "inline");
    }
}
