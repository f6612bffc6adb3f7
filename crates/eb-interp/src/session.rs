// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-invocation build session.

use async_trait::async_trait;
use eb_context::ContextResolver;
use eb_domain::Target;
use eb_llb::{BuildEngine, CachedMetaResolver};
use eb_states::{VisitedCollection, WaitBlock};
use eb_sync::CancelToken;
use eb_platform::Platform;
use eb_vars::{DefaultArgs, Scope};
use std::sync::Arc;

/// Decides whether a target can be skipped wholesale (auto-skip).
///
/// Implemented over the input-graph hasher and the skip database; the
/// session carries it as a trait so the converter stays decoupled from
/// hashing.
#[async_trait]
pub trait AutoSkipChecker: Send + Sync {
    /// True if the target's fingerprint is recorded as already built.
    async fn should_skip(&self, target: &Target, overriding: &Scope) -> bool;
}

/// Everything owned by a single top-level build invocation.
///
/// There are no process-wide singletons: the session is passed explicitly
/// through every call.
pub struct BuildSession {
    /// The engine client.
    pub engine: Arc<dyn BuildEngine>,
    /// Image meta resolution with the single-flight cache.
    pub meta_resolver: Arc<CachedMetaResolver>,
    /// The visited-targets collection, shared across converters.
    pub visited: Arc<VisitedCollection>,
    /// The build-context resolver.
    pub resolver: Arc<ContextResolver>,
    /// The implicit top-level wait block.
    pub base_wait_block: Arc<WaitBlock>,
    /// Root cancellation.
    pub cancel: CancelToken,
    /// Builtin ARG values provided by the binary.
    pub default_args: DefaultArgs,
    /// Build args given on the command line.
    pub overriding_vars: Scope,
    /// Whether push mode is enabled (`--push`).
    pub push_mode: bool,
    /// Whether this is a CI run (`--ci`).
    pub ci: bool,
    /// Whether local outputs are enabled (false under `--no-output`).
    pub local_outputs: bool,
    /// Whether `--allow-privileged` was given.
    pub allow_privileged: bool,
    /// Feature-flag overrides from the environment (comma-separated).
    pub feature_flag_overrides: String,
    /// Auto-skip, when enabled.
    pub auto_skip: Option<Arc<dyn AutoSkipChecker>>,
    /// Parallelism bound for target conversions.
    pub conversion_parallelism: usize,
    /// The platform of the build worker.
    pub native_platform: Platform,
    /// The platform of the invoking host.
    pub user_platform: Platform,
}

impl BuildSession {
    /// A session with the given engine and resolver, defaults elsewhere.
    #[must_use]
    pub fn new(engine: Arc<dyn BuildEngine>, resolver: Arc<ContextResolver>) -> Self {
        let meta_resolver = Arc::new(CachedMetaResolver::new(Arc::clone(&engine)));
        Self {
            engine,
            meta_resolver,
            visited: Arc::new(VisitedCollection::new()),
            resolver,
            base_wait_block: Arc::new(WaitBlock::new()),
            cancel: CancelToken::new(),
            default_args: DefaultArgs::default(),
            overriding_vars: Scope::new(),
            push_mode: false,
            ci: false,
            local_outputs: true,
            allow_privileged: false,
            feature_flag_overrides: String::new(),
            auto_skip: None,
            conversion_parallelism: 8,
            native_platform: Platform::host(),
            user_platform: Platform::host(),
        }
    }

    /// Set the CLI build args.
    #[must_use]
    pub fn with_overriding_vars(mut self, vars: Scope) -> Self {
        self.overriding_vars = vars;
        self
    }

    /// Enable or disable push mode.
    #[must_use]
    pub fn with_push(mut self, push: bool) -> Self {
        self.push_mode = push;
        self
    }

    /// Mark the run as CI.
    #[must_use]
    pub fn with_ci(mut self, ci: bool) -> Self {
        self.ci = ci;
        self
    }

    /// Allow privileged operations build-wide.
    #[must_use]
    pub fn with_allow_privileged(mut self, allow: bool) -> Self {
        self.allow_privileged = allow;
        self
    }

    /// Attach an auto-skip checker.
    #[must_use]
    pub fn with_auto_skip(mut self, checker: Arc<dyn AutoSkipChecker>) -> Self {
        self.auto_skip = Some(checker);
        self
    }
}
