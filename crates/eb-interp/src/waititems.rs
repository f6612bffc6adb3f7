// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concrete wait items for deferred side effects.

use async_trait::async_trait;
use eb_llb::{BuildEngine, SolveRequest, State};
use eb_states::{TargetOutputs, WaitBlock, WaitItem};
use eb_sync::CancelToken;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Solve a single state now, discarding status events.
pub(crate) async fn solve_now(engine: &Arc<dyn BuildEngine>, state: &State) -> anyhow::Result<()> {
    // Status is drained and discarded here; interactive progress for wait
    // items flows through the main solve of the enclosing block.
    let (tx, mut rx) = mpsc::channel(500);
    let request = SolveRequest::from_states(&[state]);
    let engine = Arc::clone(engine);
    let solve = engine.solve(request, tx);
    tokio::pin!(solve);
    loop {
        tokio::select! {
            result = &mut solve => {
                result?;
                return Ok(());
            }
            _ = rx.recv() => {}
        }
    }
}

/// Ensures a state has been solved by the time its block closes.
pub struct StateSyncItem {
    engine: Arc<dyn BuildEngine>,
    state: State,
}

impl StateSyncItem {
    /// Wrap a state.
    #[must_use]
    pub fn new(engine: Arc<dyn BuildEngine>, state: State) -> Self {
        Self { engine, state }
    }
}

#[async_trait]
impl WaitItem for StateSyncItem {
    // The switches do not apply to plain state items.
    fn set_do_push(&self) {}
    fn set_do_save(&self) {}

    async fn wait(&self, ctx: &CancelToken) -> anyhow::Result<()> {
        if ctx.is_cancelled() {
            anyhow::bail!("cancelled");
        }
        tokio::select! {
            result = solve_now(&self.engine, &self.state) => result,
            () = ctx.cancelled() => anyhow::bail!("cancelled"),
        }
    }
}

/// Pushes a saved image once the build has succeeded, if push is enabled.
pub struct ImagePushItem {
    engine: Arc<dyn BuildEngine>,
    state: State,
    image_name: String,
    insecure: bool,
    do_push: AtomicBool,
}

impl ImagePushItem {
    /// An inert push item; the converter flips `set_do_push` in push mode.
    #[must_use]
    pub fn new(engine: Arc<dyn BuildEngine>, state: State, image_name: &str, insecure: bool) -> Self {
        Self {
            engine,
            state,
            image_name: image_name.to_string(),
            insecure,
            do_push: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WaitItem for ImagePushItem {
    fn set_do_push(&self) {
        self.do_push.store(true, Ordering::SeqCst);
    }
    fn set_do_save(&self) {}

    async fn wait(&self, ctx: &CancelToken) -> anyhow::Result<()> {
        if !self.do_push.load(Ordering::SeqCst) {
            return Ok(());
        }
        if ctx.is_cancelled() {
            anyhow::bail!("cancelled before pushing {}", self.image_name);
        }
        // The image's state must solve before anything reaches a registry.
        tokio::select! {
            result = solve_now(&self.engine, &self.state) => result?,
            () = ctx.cancelled() => anyhow::bail!("cancelled before pushing {}", self.image_name),
        }
        debug!(target: "eb.interp", image = %self.image_name, "pushing image");
        self.engine
            .push_image(&self.image_name, self.insecure)
            .await
            .map_err(anyhow::Error::from)
    }
}

/// Runs a deferred `RUN --push` command after the build has succeeded.
pub struct RunPushItem {
    engine: Arc<dyn BuildEngine>,
    state: State,
    command: String,
    do_push: AtomicBool,
}

impl RunPushItem {
    /// An inert run-push item.
    #[must_use]
    pub fn new(engine: Arc<dyn BuildEngine>, state: State, command: &str) -> Self {
        Self {
            engine,
            state,
            command: command.to_string(),
            do_push: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WaitItem for RunPushItem {
    fn set_do_push(&self) {
        self.do_push.store(true, Ordering::SeqCst);
    }
    fn set_do_save(&self) {}

    async fn wait(&self, ctx: &CancelToken) -> anyhow::Result<()> {
        if !self.do_push.load(Ordering::SeqCst) {
            return Ok(());
        }
        if ctx.is_cancelled() {
            anyhow::bail!("cancelled before push command {:?}", self.command);
        }
        // All non-push operations of the state must succeed first.
        tokio::select! {
            result = solve_now(&self.engine, &self.state) => result?,
            () = ctx.cancelled() => anyhow::bail!("cancelled before push command {:?}", self.command),
        }
        let probe = self.engine.exec_probe(&self.state, &self.command).await?;
        if probe.exit_code != 0 {
            anyhow::bail!(
                "push command {:?} exited with code {}",
                self.command,
                probe.exit_code
            );
        }
        Ok(())
    }
}

/// Register a completed target's side effects into a wait block.
///
/// Push items are armed only in push mode; `include_local_saves` arms
/// artifact materialization (false when the target was only referenced via
/// `FROM`/`COPY` under `referenced-save-only`).
pub fn register_outputs(
    engine: &Arc<dyn BuildEngine>,
    block: &WaitBlock,
    outputs: &TargetOutputs,
    push_enabled: bool,
    include_local_saves: bool,
) {
    for save in &outputs.save_images {
        if save.waited {
            continue;
        }
        for name in &save.names {
            let item = Arc::new(ImagePushItem::new(
                Arc::clone(engine),
                save.state.clone(),
                name,
                save.insecure,
            ));
            if save.push && push_enabled {
                item.set_do_push();
            }
            block.add_item(item);
        }
    }
    for push in &outputs.run_pushes {
        if push.waited {
            continue;
        }
        let item = Arc::new(RunPushItem::new(
            Arc::clone(engine),
            push.state.clone(),
            &push.command,
        ));
        if push_enabled {
            item.set_do_push();
        }
        block.add_item(item);
    }
    if include_local_saves {
        for artifact in &outputs.save_artifacts {
            if artifact.waited {
                continue;
            }
            if artifact.local_dest.is_some() {
                block.add_item(Arc::new(StateSyncItem::new(
                    Arc::clone(engine),
                    artifact.state.clone(),
                )));
            }
        }
    }
}
