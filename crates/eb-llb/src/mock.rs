// SPDX-License-Identifier: MIT OR Apache-2.0
//! An in-process engine double for tests.

use crate::engine::{
    BuildEngine, EngineError, ProbeResult, ResolveImageOpt, ResolvedImage, SolveResult,
    SolveStatus,
};
use crate::image::ImageConfig;
use crate::request::SolveRequest;
use crate::state::State;
use async_trait::async_trait;
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A scripted [`BuildEngine`] that records what is asked of it.
///
/// - `stub_image` registers resolvable base images.
/// - `stub_probe` scripts the outcome of `exec_probe` for a command.
/// - Solves emit start/complete vertex events for every node, then succeed
///   (or fail wholesale via `fail_solves`).
/// - Pushes are recorded, never sent anywhere.
#[derive(Default)]
pub struct MockEngine {
    images: Mutex<BTreeMap<String, ImageConfig>>,
    probes: Mutex<BTreeMap<String, ProbeResult>>,
    resolve_calls: Mutex<usize>,
    solves: Mutex<Vec<SolveRequest>>,
    pushes: Mutex<Vec<String>>,
    fail_solves: Mutex<Option<EngineError>>,
}

impl MockEngine {
    /// A fresh mock with nothing stubbed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `reference` resolvable with the given config.
    pub fn stub_image(&self, reference: &str, config: ImageConfig) {
        self.images
            .lock()
            .expect("images lock")
            .insert(reference.to_string(), config);
    }

    /// Script the result of probing `command`.
    pub fn stub_probe(&self, command: &str, exit_code: i32, stdout: &str) {
        self.probes.lock().expect("probes lock").insert(
            command.to_string(),
            ProbeResult {
                exit_code,
                stdout: stdout.to_string(),
            },
        );
    }

    /// Make every subsequent solve fail with `error`.
    pub fn fail_solves(&self, error: EngineError) {
        *self.fail_solves.lock().expect("fail lock") = Some(error);
    }

    /// How many times `resolve_image_config` hit this engine.
    #[must_use]
    pub fn resolve_calls(&self) -> usize {
        *self.resolve_calls.lock().expect("calls lock")
    }

    /// The solve requests received so far.
    #[must_use]
    pub fn solves(&self) -> Vec<SolveRequest> {
        self.solves.lock().expect("solves lock").clone()
    }

    /// The image names pushed so far.
    #[must_use]
    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().expect("pushes lock").clone()
    }
}

#[async_trait]
impl BuildEngine for MockEngine {
    async fn solve(
        &self,
        request: SolveRequest,
        status: mpsc::Sender<SolveStatus>,
    ) -> Result<SolveResult, EngineError> {
        if let Some(err) = self.fail_solves.lock().expect("fail lock").clone() {
            return Err(err);
        }

        for node in &request.nodes {
            let _ = status
                .send(SolveStatus::VertexStarted {
                    digest: node.digest.clone(),
                    name: node.op.label(),
                    cached: false,
                })
                .await;
            let _ = status
                .send(SolveStatus::VertexCompleted {
                    digest: node.digest.clone(),
                    error: String::new(),
                })
                .await;
        }

        let mut result = SolveResult::default();
        for export in &request.exports {
            let prefix = format!("ref/{}", export.ref_key);
            if export.metadata.contains_key(&format!("{prefix}/export-image")) {
                let name = export
                    .metadata
                    .get(&format!("{prefix}/image.name"))
                    .map(|v| String::from_utf8_lossy(v).to_string())
                    .unwrap_or_default();
                result.image_refs.insert(export.ref_key.clone(), name);
            } else if export.metadata.contains_key(&format!("{prefix}/export-dir")) {
                let dest = export
                    .metadata
                    .get(&format!("{prefix}/dest-path"))
                    .map(|v| String::from_utf8_lossy(v).to_string())
                    .unwrap_or_default();
                result.artifact_dirs.insert(export.ref_key.clone(), dest);
            }
            for (k, v) in &export.metadata {
                result.metadata.insert(k.clone(), v.clone());
            }
        }

        self.solves.lock().expect("solves lock").push(request);
        Ok(result)
    }

    async fn resolve_image_config(
        &self,
        reference: &str,
        _opt: ResolveImageOpt,
    ) -> Result<ResolvedImage, EngineError> {
        *self.resolve_calls.lock().expect("calls lock") += 1;
        let images = self.images.lock().expect("images lock");
        match images.get(reference) {
            Some(config) => Ok(ResolvedImage {
                reference: reference.to_string(),
                digest: format!(
                    "sha256:{}",
                    hex::encode(Sha256::digest(reference.as_bytes()))
                ),
                config: config.clone(),
            }),
            None => Err(EngineError::Unknown(format!(
                "image {reference} is not stubbed"
            ))),
        }
    }

    async fn exec_probe(&self, _state: &State, command: &str) -> Result<ProbeResult, EngineError> {
        let probes = self.probes.lock().expect("probes lock");
        match probes.get(command) {
            Some(result) => Ok(result.clone()),
            // Unknown probes succeed with empty output, which keeps simple
            // IF conditions usable without scripting.
            None => Ok(ProbeResult::default()),
        }
    }

    async fn push_image(&self, image_name: &str, _insecure: bool) -> Result<(), EngineError> {
        self.pushes
            .lock()
            .expect("pushes lock")
            .push(image_name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;
    use eb_platform::Platform;

    #[tokio::test]
    async fn solve_emits_vertex_events_in_order() {
        let engine = MockEngine::new();
        let state = State::source(
            Op::Image {
                reference: "alpine".to_string(),
                resolved_digest: String::new(),
            },
            Platform::new("linux", "amd64"),
            "+t",
        );
        let request = SolveRequest::from_states(&[&state]);

        let (tx, mut rx) = mpsc::channel(16);
        engine.solve(request, tx).await.expect("solve");

        let first = rx.recv().await.expect("event");
        assert!(matches!(first, SolveStatus::VertexStarted { .. }));
        let second = rx.recv().await.expect("event");
        assert!(matches!(second, SolveStatus::VertexCompleted { .. }));
    }

    #[tokio::test]
    async fn scripted_probes_and_defaults() {
        let engine = MockEngine::new();
        engine.stub_probe("test -f /x", 1, "");
        let state = State::scratch();

        let scripted = engine.exec_probe(&state, "test -f /x").await.expect("probe");
        assert_eq!(scripted.exit_code, 1);

        let default = engine.exec_probe(&state, "true").await.expect("probe");
        assert_eq!(default.exit_code, 0);
    }

    #[tokio::test]
    async fn failed_solves_do_not_record() {
        let engine = MockEngine::new();
        engine.fail_solves(EngineError::ExitCode(1));
        let (tx, _rx) = mpsc::channel(4);
        let err = engine
            .solve(SolveRequest::default(), tx)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::ExitCode(1));
        assert!(engine.solves().is_empty());
    }

    #[tokio::test]
    async fn pushes_are_recorded() {
        let engine = MockEngine::new();
        engine.push_image("registry/app:v1", false).await.expect("push");
        assert_eq!(engine.pushes(), vec!["registry/app:v1"]);
    }
}
