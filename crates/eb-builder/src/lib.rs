// SPDX-License-Identifier: MIT OR Apache-2.0
//! The solver coordinator.
//!
//! Translates converter output into an engine [`SolveRequest`], drives the
//! solve while fanning progress into a bounded bus, routes materialized
//! outputs to user callbacks, and closes the implicit top-level wait block
//! so push/save side effects run only after the graph has solved.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod progress;
mod skip;

pub use progress::{ProgressBus, ProgressStats};
pub use skip::InputGraphSkipChecker;

use eb_domain::Target;
use eb_interp::{BuildSession, InterpreterError, build_target, register_outputs};
use eb_llb::{
    CacheOptionEntry, EngineError, ExportCrafter, SolveRequest, SolveResult, SolveStatus,
    classify_engine_error,
};
use eb_platform::Platform;
use eb_vars::Scope;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Size of the engine status channel. Large enough to consume status
/// messages without back-pressure that would force the engine to cancel.
const STATUS_CHAN_SIZE: usize = 500;

/// Errors from the build coordinator.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The interpreter rejected the build.
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    /// The engine failed the solve.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A wait-block side effect failed after the solve.
    #[error("post-build side effect failed: {0:#}")]
    WaitBlock(anyhow::Error),
    /// Invalid cache configuration.
    #[error("invalid cache configuration: {0}")]
    CacheConfig(String),
}

/// Per-invocation build options.
#[derive(Debug, Clone, Default)]
pub struct BuildOpt {
    /// Explicit platform for the root target.
    pub platform: Option<Platform>,
    /// Build args from the command line.
    pub overriding_vars: Scope,
    /// Registry refs to import cache from.
    pub cache_imports: Vec<String>,
    /// Registry ref to export cache to (normal mode). At most one.
    pub cache_export: String,
    /// Registry ref to export cache to (max mode). At most one.
    pub max_cache_export: String,
    /// Embed layer hints in pushed images.
    pub save_inline_cache: bool,
    /// Local destination for the root artifact (`--artifact` mode).
    pub final_artifact_dest: Option<String>,
    /// Session secrets, name → value.
    pub secrets: BTreeMap<String, String>,
}

/// What a completed build produced.
#[derive(Debug, Default)]
pub struct BuildResult {
    /// Image names exported (ref key → name).
    pub image_names: BTreeMap<String, String>,
    /// Artifact directories exported (ref key → host destination).
    pub artifact_dests: BTreeMap<String, String>,
    /// Progress delivery counters.
    pub progress: ProgressStats,
}

/// Callbacks invoked for materialized outputs.
#[derive(Default)]
pub struct OutputHandlers {
    /// Called for every exported image name.
    pub on_image: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Called for every exported artifact `(artifact, dest-path)`.
    pub on_artifact: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
    /// Called for the root user-requested artifact destination.
    pub on_final_artifact: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

/// Drives one root target build end to end.
pub struct Builder {
    session: Arc<BuildSession>,
}

impl Builder {
    /// A builder over an existing session.
    #[must_use]
    pub fn new(session: Arc<BuildSession>) -> Self {
        Self { session }
    }

    /// The session, for wiring (skip db recording, cancellation).
    #[must_use]
    pub fn session(&self) -> &Arc<BuildSession> {
        &self.session
    }

    /// Build `target` and materialize its outputs.
    pub async fn build(
        &self,
        target: &Target,
        opt: BuildOpt,
        handlers: &OutputHandlers,
        status_sink: Option<mpsc::Sender<SolveStatus>>,
    ) -> Result<BuildResult, BuildError> {
        info!(target: "eb.builder", target = %target.string_canonical(), "starting build");

        // 1. Convert. The implicit top-level wait block is already open
        //    (it lives on the session); conversions of referenced targets
        //    register their side effects into it.
        let outputs = build_target(
            &self.session,
            target,
            opt.platform.clone(),
            opt.overriding_vars.clone(),
            self.session.allow_privileged,
            &[],
        )
        .await?;

        register_outputs(
            &self.session.engine,
            &self.session.base_wait_block,
            &outputs,
            self.session.push_mode,
            self.session.local_outputs,
        );

        // 2. Compose the solve request from every visited conversion.
        let mut request = self.compose_request(&opt)?;
        debug!(
            target: "eb.builder",
            nodes = request.nodes.len(),
            exports = request.exports.len(),
            "composed solve request"
        );
        request.allow_privileged = self.session.allow_privileged;

        // 3. Drive the engine, fanning progress through the bounded bus.
        let (engine_tx, engine_rx) = mpsc::channel(STATUS_CHAN_SIZE);
        let bus = ProgressBus::new(status_sink);
        let monitor = tokio::spawn(bus.clone().pump(engine_rx));

        let solve_result = self.session.engine.solve(request, engine_tx).await;
        let _ = monitor.await;

        let solved = match solve_result {
            Ok(solved) => solved,
            Err(err) => {
                // Engine error text sometimes carries an interpreter error
                // verbatim; restore its structure when it does.
                if let EngineError::Unknown(text) = &err {
                    if let Some(ie) = InterpreterError::from_error_text(text) {
                        return Err(BuildError::Interpreter(ie));
                    }
                    return Err(BuildError::Engine(classify_engine_error(text)));
                }
                return Err(BuildError::Engine(err));
            }
        };

        // 4. Close the top-level block: pushes and saves run only now,
        //    after the graph has solved.
        self.session
            .base_wait_block
            .wait(&self.session.cancel)
            .await
            .map_err(BuildError::WaitBlock)?;

        Ok(self.route_outputs(solved, handlers, bus.stats()))
    }

    fn compose_request(&self, opt: &BuildOpt) -> Result<SolveRequest, BuildError> {
        let mut crafter = ExportCrafter::new();
        let mut states = Vec::new();

        for entry in self.session.visited.all() {
            let Some(outputs) = entry.outputs() else {
                continue;
            };
            states.push(outputs.final_state.clone());

            for save in &outputs.save_images {
                states.push(save.state.clone());
                for name in &save.names {
                    crafter
                        .add_image_entry(
                            save.state.digest(),
                            name,
                            save.push && self.session.push_mode,
                            save.insecure,
                            &save.config,
                            Some(&entry.platform.to_string()),
                            save.no_manifest_list,
                        )
                        .map_err(|e| BuildError::CacheConfig(e.to_string()))?;
                }
            }
            if self.session.local_outputs {
                for artifact in &outputs.save_artifacts {
                    if let Some(dest) = &artifact.local_dest {
                        states.push(artifact.state.clone());
                        crafter
                            .add_artifact_local_entry(
                                artifact.state.digest(),
                                &format!(
                                    "{}{}",
                                    entry.target.string_canonical(),
                                    artifact.artifact_path
                                ),
                                &artifact.src_path,
                                dest,
                                false,
                            )
                            .map_err(|e| BuildError::CacheConfig(e.to_string()))?;
                    }
                }
            }
        }

        if let Some(dest) = &opt.final_artifact_dest {
            // The root artifact destination requested with `--artifact`.
            if let Some(root) = self.session.visited.all().first()
                && let Some(outputs) = root.outputs()
            {
                crafter
                    .add_artifact_local_entry(
                        outputs.final_state.digest(),
                        &root.target.string_canonical(),
                        "/",
                        dest,
                        true,
                    )
                    .map_err(|e| BuildError::CacheConfig(e.to_string()))?;
            }
        }

        let state_refs: Vec<&eb_llb::State> = states.iter().collect();
        let mut request = SolveRequest::from_states(&state_refs);
        request.exports = crafter
            .take_entries()
            .map_err(|e| BuildError::CacheConfig(e.to_string()))?;
        request.cache_imports = opt
            .cache_imports
            .iter()
            .map(|r| cache_entry_from_flag(r, false))
            .collect::<Result<_, _>>()?;
        request.cache_exports = self.cache_exports(opt)?;
        request.secrets = opt.secrets.clone();
        Ok(request)
    }

    fn cache_exports(&self, opt: &BuildOpt) -> Result<Vec<CacheOptionEntry>, BuildError> {
        let mut exports = Vec::new();
        if !opt.cache_export.is_empty() {
            exports.push(cache_entry_from_flag(&opt.cache_export, false)?);
        }
        if !opt.max_cache_export.is_empty() {
            exports.push(cache_entry_from_flag(&opt.max_cache_export, true)?);
        }
        if opt.save_inline_cache {
            exports.push(CacheOptionEntry::inline());
        }
        Ok(exports)
    }

    fn route_outputs(
        &self,
        solved: SolveResult,
        handlers: &OutputHandlers,
        progress: ProgressStats,
    ) -> BuildResult {
        let mut result = BuildResult {
            progress,
            ..BuildResult::default()
        };
        for (ref_key, name) in &solved.image_refs {
            if let Some(on_image) = &handlers.on_image {
                on_image(name);
            }
            result.image_names.insert(ref_key.clone(), name.clone());
        }
        for (ref_key, dest) in &solved.artifact_dirs {
            let is_final = solved
                .metadata
                .get(&format!("ref/{ref_key}/final-artifact"))
                .is_some_and(|v| v == b"true");
            if is_final {
                if let Some(on_final) = &handlers.on_final_artifact {
                    on_final(dest);
                }
            } else if let Some(on_artifact) = &handlers.on_artifact {
                let artifact = solved
                    .metadata
                    .get(&format!("ref/{ref_key}/artifact"))
                    .map(|v| String::from_utf8_lossy(v).to_string())
                    .unwrap_or_default();
                on_artifact(&artifact, dest);
            }
            result.artifact_dests.insert(ref_key.clone(), dest.clone());
        }
        result
    }
}

/// Parse a cache flag value of the form `ref[,attr=value,…]`.
fn cache_entry_from_flag(value: &str, max_mode: bool) -> Result<CacheOptionEntry, BuildError> {
    let mut parts = value.split(',');
    let reference = parts
        .next()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| BuildError::CacheConfig(format!("empty cache ref in {value:?}")))?;
    let mut entry = if max_mode {
        CacheOptionEntry::registry_max(reference)
    } else {
        CacheOptionEntry::registry(reference)
    };
    for part in parts {
        let (k, v) = part.split_once('=').ok_or_else(|| {
            BuildError::CacheConfig(format!("invalid cache attribute {part:?} in {value:?}"))
        })?;
        entry.attrs.insert(k.to_string(), v.to_string());
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_flags_parse_refs_and_attrs() {
        let entry = cache_entry_from_flag("reg.example.com/cache:main,compression=zstd", false)
            .expect("parse");
        assert_eq!(entry.kind, "registry");
        assert_eq!(
            entry.attrs.get("ref").map(String::as_str),
            Some("reg.example.com/cache:main")
        );
        assert_eq!(
            entry.attrs.get("compression").map(String::as_str),
            Some("zstd")
        );

        let max = cache_entry_from_flag("r/c", true).expect("parse");
        assert_eq!(max.attrs.get("mode").map(String::as_str), Some("max"));

        assert!(cache_entry_from_flag("", false).is_err());
        assert!(cache_entry_from_flag("r/c,badattr", false).is_err());
    }
}
