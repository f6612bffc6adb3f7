// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed LLB states.

use crate::op::Op;
use eb_platform::Platform;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::sync::Arc;

/// A content digest of an LLB node, `sha256:<hex>`.
pub type Digest = String;

#[derive(Debug)]
struct Node {
    digest: Digest,
    op: Op,
    inputs: Vec<State>,
    platform: Platform,
    provenance: String,
    cache_hints: Vec<String>,
}

/// An immutable handle on a filesystem snapshot plus pending operations.
///
/// Appending an operation returns a *new* state; the old one remains valid
/// (this is how `IF` probes discard their mutations). Each node's digest
/// covers the operation payload, the input digests, the platform, and the
/// caller provenance, so equal subgraphs deduplicate by digest.
#[derive(Debug, Clone, Default)]
pub struct State {
    node: Option<Arc<Node>>,
}

#[derive(Serialize)]
struct DigestPayload<'a> {
    op: &'a Op,
    inputs: &'a [Digest],
    platform: String,
    provenance: &'a str,
    cache_hints: &'a [String],
}

impl State {
    /// The empty (scratch) state.
    #[must_use]
    pub fn scratch() -> Self {
        Self { node: None }
    }

    /// True for the empty state.
    #[must_use]
    pub fn is_scratch(&self) -> bool {
        self.node.is_none()
    }

    /// Begin a graph from a source operation.
    #[must_use]
    pub fn source(op: Op, platform: Platform, provenance: &str) -> Self {
        Self::scratch().append_with_inputs(op, Vec::new(), platform, provenance, Vec::new())
    }

    /// Append an operation whose sole input is this state.
    #[must_use]
    pub fn append(&self, op: Op, platform: Platform, provenance: &str) -> Self {
        self.append_with_inputs(op, vec![self.clone()], platform, provenance, Vec::new())
    }

    /// Append an operation with explicit inputs (input 0 should normally be
    /// this state).
    #[must_use]
    pub fn append_with_inputs(
        &self,
        op: Op,
        inputs: Vec<State>,
        platform: Platform,
        provenance: &str,
        cache_hints: Vec<String>,
    ) -> Self {
        let input_digests: Vec<Digest> = inputs.iter().map(State::digest).collect();
        let payload = DigestPayload {
            op: &op,
            inputs: &input_digests,
            platform: platform.to_string(),
            provenance,
            cache_hints: &cache_hints,
        };
        let encoded = serde_json::to_vec(&payload).expect("op payload serializes");
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&encoded)));

        Self {
            node: Some(Arc::new(Node {
                digest,
                op,
                inputs,
                platform,
                provenance: provenance.to_string(),
                cache_hints,
            })),
        }
    }

    /// The digest of the head node; scratch has a fixed digest.
    #[must_use]
    pub fn digest(&self) -> Digest {
        match &self.node {
            Some(node) => node.digest.clone(),
            None => "sha256:scratch".to_string(),
        }
    }

    /// The head operation, if any.
    #[must_use]
    pub fn op(&self) -> Option<&Op> {
        self.node.as_ref().map(|n| &n.op)
    }

    /// The head node's platform, if any.
    #[must_use]
    pub fn platform(&self) -> Option<&Platform> {
        self.node.as_ref().map(|n| &n.platform)
    }

    /// The head node's provenance (the target that emitted it).
    #[must_use]
    pub fn provenance(&self) -> Option<&str> {
        self.node.as_ref().map(|n| n.provenance.as_str())
    }

    /// The head node's inputs.
    #[must_use]
    pub fn inputs(&self) -> &[State] {
        match &self.node {
            Some(node) => &node.inputs,
            None => &[],
        }
    }

    /// Walk the graph rooted here, deduplicated by digest, inputs before
    /// dependents.
    #[must_use]
    pub fn collect_nodes(&self) -> Vec<SerializedNode> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        self.collect_into(&mut seen, &mut out);
        out
    }

    fn collect_into(
        &self,
        seen: &mut std::collections::HashSet<Digest>,
        out: &mut Vec<SerializedNode>,
    ) {
        let Some(node) = &self.node else {
            return;
        };
        if !seen.insert(node.digest.clone()) {
            return;
        }
        for input in &node.inputs {
            input.collect_into(seen, out);
        }
        out.push(SerializedNode {
            digest: node.digest.clone(),
            op: node.op.clone(),
            inputs: node.inputs.iter().map(State::digest).collect(),
            platform: node.platform.to_string(),
            provenance: node.provenance.clone(),
            cache_hints: node.cache_hints.clone(),
        });
    }
}

/// One node of a serialized LLB graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedNode {
    /// Content digest.
    pub digest: Digest,
    /// The operation payload.
    pub op: Op,
    /// Digests of the inputs, in order.
    pub inputs: Vec<Digest>,
    /// Platform string.
    pub platform: String,
    /// Caller provenance.
    pub provenance: String,
    /// Cache hints attached to the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_hints: Vec<String>,
}
