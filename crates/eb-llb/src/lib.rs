// SPDX-License-Identifier: MIT OR Apache-2.0
//! The low-level build (LLB) graph model and the engine client interface.
//!
//! An LLB [`State`] is an immutable handle on a filesystem snapshot:
//! appending an operation returns a new state whose digest covers the
//! operation payload, its input digests, the platform, and caller
//! provenance — identical subgraphs share identical digests.
//!
//! The container build engine itself is external; [`BuildEngine`] is its
//! interface, and [`MockEngine`](mock::MockEngine) is an in-process test
//! double.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crafter;
mod engine;
mod image;
mod metaresolver;
pub mod mock;
mod op;
mod request;
mod state;

pub use crafter::{CrafterError, ExportCrafter};
pub use engine::{
    BuildEngine, EngineError, ProbeResult, ResolveImageOpt, ResolvedImage, SolveResult,
    SolveStatus, classify_engine_error,
};
pub use image::{HealthCheck, ImageConfig};
pub use metaresolver::CachedMetaResolver;
pub use op::{CacheSharingMode, CopyOp, Mount, MountKind, NetworkMode, Op, RunOp};
pub use request::{CacheOptionEntry, ExportEntry, SolveRequest};
pub use state::{Digest, SerializedNode, State};
