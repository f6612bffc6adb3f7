// SPDX-License-Identifier: MIT OR Apache-2.0
//! The memoized state of one converted target.

use eb_domain::Target;
use eb_llb::{ImageConfig, State};
use eb_platform::Platform;
use eb_sync::CancelToken;
use eb_vars::Scope;
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced through target states.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatesError {
    /// A dependency target failed; waiters observe its error.
    #[error("dependency {target} failed: {error}")]
    DependencyFailed {
        /// The failed target's canonical reference.
        target: String,
        /// The failure text.
        error: String,
    },
    /// Waiting was cancelled.
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),
    /// A cyclic target dependency.
    #[error("cyclic target dependency: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// A `SAVE IMAGE` registration.
#[derive(Debug, Clone)]
pub struct SaveImage {
    /// The state whose filesystem becomes the image.
    pub state: State,
    /// The image config at save time.
    pub config: ImageConfig,
    /// Image names to tag.
    pub names: Vec<String>,
    /// Push after a successful build (wait-block gated).
    pub push: bool,
    /// Save the whole target as part of the remote cache.
    pub cache_hint: bool,
    /// Push over an unencrypted connection.
    pub insecure: bool,
    /// Skip the manifest list.
    pub no_manifest_list: bool,
    /// Additional registry cache imports.
    pub cache_from: Vec<String>,
    /// Skip the build-information labels.
    pub without_earthly_labels: bool,
    /// The side effect already ran inside an explicit WAIT block.
    pub waited: bool,
}

/// A `SAVE ARTIFACT` registration.
#[derive(Debug, Clone)]
pub struct SaveArtifact {
    /// The state the artifact is taken from.
    pub state: State,
    /// Source path inside the state.
    pub src_path: String,
    /// Path under the target's artifact root.
    pub artifact_path: String,
    /// Optional `AS LOCAL` host destination.
    pub local_dest: Option<String>,
    /// Tolerate a missing source.
    pub if_exists: bool,
    /// The save was forced past the unsafe-destination check.
    pub force: bool,
    /// The side effect already ran inside an explicit WAIT block.
    pub waited: bool,
}

/// A deferred `RUN --push` registration.
#[derive(Debug, Clone)]
pub struct RunPush {
    /// The state the push command runs on.
    pub state: State,
    /// The command, for display.
    pub command: String,
    /// The side effect already ran inside an explicit WAIT block.
    pub waited: bool,
}

/// Everything a completed conversion produces.
#[derive(Debug, Clone, Default)]
pub struct TargetOutputs {
    /// The final filesystem state.
    pub final_state: State,
    /// The final image config.
    pub image_config: ImageConfig,
    /// `SAVE IMAGE` registrations, in order.
    pub save_images: Vec<SaveImage>,
    /// `SAVE ARTIFACT` registrations, in order.
    pub save_artifacts: Vec<SaveArtifact>,
    /// Deferred `RUN --push` registrations, in order.
    pub run_pushes: Vec<RunPush>,
    /// Global args exported by the target's file.
    pub globals: Scope,
    /// The `PROJECT` declaration, if any (`org`, `project`).
    pub project: Option<(String, String)>,
}

#[derive(Debug, Clone)]
enum CompletionState {
    Pending,
    Done(std::sync::Arc<TargetOutputs>),
    Failed(String),
}

/// Observed completion of a [`SingleTarget`].
#[derive(Debug, Clone)]
pub enum Completion {
    /// The conversion completed with these outputs.
    Done(std::sync::Arc<TargetOutputs>),
    /// The conversion failed.
    Failed(String),
}

/// The single build state for one `(target, platform, args)` key.
///
/// Created pending; the creator converts the target and then calls
/// [`complete`](Self::complete) or [`fail`](Self::fail). Concurrent callers
/// share the entry and wait on its subject.
#[derive(Debug)]
pub struct SingleTarget {
    /// The canonical target.
    pub target: Target,
    /// The platform the target is converted for.
    pub platform: Platform,
    /// Whether privileged operations are allowed.
    pub allow_privileged: bool,
    /// The visited key string (diagnostics).
    pub key: String,
    sender: watch::Sender<CompletionState>,
}

impl SingleTarget {
    pub(crate) fn new(
        target: Target,
        platform: Platform,
        allow_privileged: bool,
        key: String,
    ) -> Self {
        let (sender, _) = watch::channel(CompletionState::Pending);
        Self {
            target,
            platform,
            allow_privileged,
            key,
            sender,
        }
    }

    /// Mark the conversion complete. First writer wins.
    pub fn complete(&self, outputs: TargetOutputs) {
        self.sender.send_modify(|state| {
            if matches!(state, CompletionState::Pending) {
                *state = CompletionState::Done(std::sync::Arc::new(outputs));
            }
        });
    }

    /// Mark the conversion failed. First writer wins.
    pub fn fail(&self, error: String) {
        self.sender.send_modify(|state| {
            if matches!(state, CompletionState::Pending) {
                *state = CompletionState::Failed(error);
            }
        });
    }

    /// The outputs, if the conversion has completed successfully.
    #[must_use]
    pub fn outputs(&self) -> Option<std::sync::Arc<TargetOutputs>> {
        match &*self.sender.borrow() {
            CompletionState::Done(outputs) => Some(std::sync::Arc::clone(outputs)),
            _ => None,
        }
    }

    /// True while neither [`complete`](Self::complete) nor
    /// [`fail`](Self::fail) has been called.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(&*self.sender.borrow(), CompletionState::Pending)
    }

    /// Wait for completion, or for `ctx` cancellation.
    pub async fn wait(&self, ctx: &CancelToken) -> Result<std::sync::Arc<TargetOutputs>, StatesError> {
        let mut receiver = self.sender.subscribe();
        loop {
            match self.completion_snapshot(&receiver) {
                Some(Completion::Done(outputs)) => return Ok(outputs),
                Some(Completion::Failed(error)) => {
                    return Err(StatesError::DependencyFailed {
                        target: self.target.string_canonical(),
                        error,
                    });
                }
                None => {}
            }
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        // Sender dropped while pending: treat as failure.
                        return Err(StatesError::DependencyFailed {
                            target: self.target.string_canonical(),
                            error: "conversion abandoned".to_string(),
                        });
                    }
                }
                () = ctx.cancelled() => {
                    return Err(StatesError::Cancelled(self.target.string_canonical()));
                }
            }
        }
    }

    fn completion_snapshot(
        &self,
        receiver: &watch::Receiver<CompletionState>,
    ) -> Option<Completion> {
        match &*receiver.borrow() {
            CompletionState::Pending => None,
            CompletionState::Done(outputs) => {
                Some(Completion::Done(std::sync::Arc::clone(outputs)))
            }
            CompletionState::Failed(error) => Some(Completion::Failed(error.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eb_sync::CancelReason;

    fn target() -> SingleTarget {
        SingleTarget::new(
            Target::parse("+t").expect("target"),
            Platform::new("linux", "amd64"),
            false,
            "key".to_string(),
        )
    }

    #[tokio::test]
    async fn wait_observes_completion() {
        let st = std::sync::Arc::new(target());
        let waiter = std::sync::Arc::clone(&st);
        let ctx = CancelToken::new();
        let handle = tokio::spawn(async move { waiter.wait(&ctx).await });

        tokio::task::yield_now().await;
        st.complete(TargetOutputs::default());

        let outputs = handle.await.expect("join").expect("wait");
        assert!(outputs.save_images.is_empty());
        assert!(!st.is_pending());
    }

    #[tokio::test]
    async fn wait_observes_failure() {
        let st = target();
        st.fail("boom".to_string());
        let err = st.wait(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, StatesError::DependencyFailed { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn wait_respects_cancellation() {
        let st = std::sync::Arc::new(target());
        let ctx = CancelToken::new();
        let waiter = std::sync::Arc::clone(&st);
        let wait_ctx = ctx.clone();
        let handle = tokio::spawn(async move { waiter.wait(&wait_ctx).await });

        tokio::task::yield_now().await;
        ctx.cancel(CancelReason::Interrupt);

        let err = handle.await.expect("join").unwrap_err();
        assert!(matches!(err, StatesError::Cancelled(_)));
    }

    #[tokio::test]
    async fn first_completion_wins() {
        let st = target();
        st.complete(TargetOutputs {
            project: Some(("org".to_string(), "proj".to_string())),
            ..TargetOutputs::default()
        });
        st.fail("late failure".to_string());
        let outputs = st.wait(&CancelToken::new()).await.expect("wait");
        assert_eq!(
            outputs.project,
            Some(("org".to_string(), "proj".to_string()))
        );
    }
}
