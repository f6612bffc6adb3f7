// SPDX-License-Identifier: MIT OR Apache-2.0
//! The converter: executes a recipe AST against an LLB state.

use crate::dispatch::CommandTag;
use crate::error::InterpreterError;
use crate::session::BuildSession;
use crate::waititems::{ImagePushItem, RunPushItem, StateSyncItem, register_outputs};
use eb_ast::spec::{
    Block, Command, Earthfile, ForStatement, IfStatement, Statement, TryStatement, WaitStatement,
    WithStatement,
};
use eb_context::BuildContext;
use eb_domain::{Artifact, ImportTracker, Target, join_references, normalize_path};
use eb_features::{Features, apply_flag_overrides};
use eb_flag::{
    BuildOpts, CacheOpts, CopyOpts, DoOpts, ForOpts, FromDockerfileOpts, FromOpts, GitCloneOpts,
    HealthCheckOpts, IfOpts, ImportOpts, RunOpts, SaveArtifactOpts, SaveImageOpts, WithDockerOpts,
    parse_arg_args, parse_args_cleaned, parse_key_value, parse_load, parse_params,
    process_params_and_quotes, split_flag_values,
};
use eb_llb::{
    CacheSharingMode, CopyOp, ImageConfig, Mount, MountKind, NetworkMode, Op, ResolveImageOpt,
    RunOp, State,
};
use eb_platform::{Platform, PlatformResolver, PlatformSpec};
use eb_states::{RunPush, SaveArtifact, SaveImage, StateKey, TargetOutputs, WaitBlock, WaitItem};
use eb_vars::{
    Collection, CollectionOpt, ExpandSegment, Scope, combine_scopes, parse_expansion,
    set_platform_args,
};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

type InterpResult<T> = Result<T, InterpreterError>;

/// Build (or reuse) one target's conversion through the visited collection.
pub(crate) fn build_target_impl<'a>(
    session: &'a Arc<BuildSession>,
    target: &'a Target,
    platform: Option<Platform>,
    overriding: Scope,
    allow_privileged: bool,
    chain: &'a [StateKey],
) -> Pin<Box<dyn Future<Output = InterpResult<Arc<TargetOutputs>>> + Send + 'a>> {
    Box::pin(async move {
        if session.cancel.is_cancelled() {
            return Err(InterpreterError::plain("build cancelled"));
        }

        let platform = platform.unwrap_or_else(|| session.native_platform.clone());

        if let Some(checker) = &session.auto_skip
            && checker.should_skip(target, &overriding).await
        {
            debug!(target: "eb.interp", target = %target.string_canonical(), "auto-skip hit");
            return Ok(Arc::new(TargetOutputs::default()));
        }

        let (entry, is_new) =
            session
                .visited
                .add(target, &platform, allow_privileged, &overriding, chain)
                .map_err(|e| InterpreterError::plain(e.to_string()))?;
        if !is_new {
            return entry
                .wait(&session.cancel)
                .await
                .map_err(|e| InterpreterError::plain(e.to_string()));
        }

        let key = StateKey::new(target, &platform, allow_privileged, &overriding);
        let mut chain = chain.to_vec();
        chain.push(key);

        let result = convert_target(
            session,
            target,
            platform,
            overriding,
            allow_privileged,
            &chain,
        )
        .await;

        match result {
            Ok(outputs) => {
                entry.complete(outputs);
                Ok(entry.outputs().expect("entry just completed"))
            }
            Err(err) => {
                entry.fail(err.to_string());
                Err(err)
            }
        }
    })
}

async fn convert_target(
    session: &Arc<BuildSession>,
    target: &Target,
    platform: Platform,
    overriding: Scope,
    allow_privileged: bool,
    chain: &[StateKey],
) -> InterpResult<TargetOutputs> {
    let context = session
        .resolver
        .resolve(target)
        .await
        .map_err(|e| InterpreterError::plain(e.to_string()))?;

    let earthfile = Arc::new(
        eb_ast::parse_file(&context.build_file_path)
            .map_err(|e| InterpreterError::plain(e.to_string()))?,
    );

    let version_args = earthfile.version.as_ref().map(|v| v.args.as_slice());
    let (mut ftrs, _) = Features::get(version_args)
        .map_err(|e| InterpreterError::plain(e.to_string()))?;
    if !session.feature_flag_overrides.is_empty() {
        apply_flag_overrides(&mut ftrs, &session.feature_flag_overrides)
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
    }
    ftrs.process_flags()
        .map_err(|e| InterpreterError::plain(e.to_string()))?;

    let mut platr = PlatformResolver::new(
        session.native_platform.clone(),
        session.user_platform.clone(),
    );
    platr.set_default(PlatformSpec::Specific(platform.clone()));
    platr.update_platform(PlatformSpec::Specific(platform));

    let mut converter = Converter::new(
        Arc::clone(session),
        target.clone(),
        context,
        earthfile,
        ftrs,
        platr,
        overriding,
        allow_privileged,
        chain.to_vec(),
    );
    converter.convert().await
}

/// Converts one target's recipe into LLB states and outputs.
pub struct Converter {
    session: Arc<BuildSession>,
    target: Target,
    context: Arc<BuildContext>,
    earthfile: Arc<Earthfile>,
    ftrs: Features,
    platr: PlatformResolver,
    collection: Collection,
    imports: ImportTracker,
    state: State,
    image_config: ImageConfig,
    outputs: TargetOutputs,
    wait_stack: Vec<Arc<WaitBlock>>,
    chain: Vec<StateKey>,
    allow_privileged: bool,
    cache_mounts: Vec<Mount>,
    hosts: Vec<(String, String)>,
    first_from_done: bool,
    post_save: bool,
    locally: bool,
    interactive_done: bool,
    in_base_recipe: bool,
    function_depth: usize,
}

impl Converter {
    #[allow(clippy::too_many_arguments)]
    fn new(
        session: Arc<BuildSession>,
        target: Target,
        context: Arc<BuildContext>,
        earthfile: Arc<Earthfile>,
        ftrs: Features,
        platr: PlatformResolver,
        overriding: Scope,
        allow_privileged: bool,
        chain: Vec<StateKey>,
    ) -> Self {
        let collection = Collection::new(
            &ftrs,
            &platr,
            CollectionOpt {
                target: target.clone(),
                builtin_args: session.default_args.clone(),
                overriding,
                globals: Scope::new(),
                git_meta: context.git_meta.clone(),
                push: session.push_mode,
                ci: session.ci,
            },
        );
        Self {
            session,
            target,
            context,
            earthfile,
            ftrs,
            platr,
            collection,
            imports: ImportTracker::default(),
            state: State::scratch(),
            image_config: ImageConfig::default(),
            outputs: TargetOutputs::default(),
            wait_stack: Vec::new(),
            chain,
            allow_privileged,
            cache_mounts: Vec::new(),
            hosts: Vec::new(),
            first_from_done: false,
            post_save: false,
            locally: false,
            interactive_done: false,
            in_base_recipe: false,
            function_depth: 0,
        }
    }

    async fn convert(&mut self) -> InterpResult<TargetOutputs> {
        // The base recipe establishes the implicit base state, global args,
        // and global imports for every target of the file.
        let base = self.earthfile.base_recipe.clone();
        self.in_base_recipe = true;
        self.interpret_block(&base).await?;
        self.in_base_recipe = false;

        let name = self.target.target.clone();
        if name != "base" {
            let recipe = self
                .earthfile
                .target(&name)
                .ok_or_else(|| {
                    InterpreterError::plain(format!(
                        "target {name} not found in {}",
                        self.context.build_file_path.display()
                    ))
                })?
                .recipe
                .clone();
            self.interpret_block(&recipe).await?;
        }

        self.outputs.final_state = self.state.clone();
        self.outputs.image_config = self.image_config.clone();
        self.outputs.globals = self.collection.globals().clone();
        Ok(self.outputs.clone())
    }

    // -- statement walking ----------------------------------------------

    fn interpret_block<'a>(
        &'a mut self,
        block: &'a Block,
    ) -> Pin<Box<dyn Future<Output = InterpResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            for statement in block {
                let returned = self.interpret_statement(statement).await?;
                if returned {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    async fn interpret_statement(&mut self, statement: &Statement) -> InterpResult<bool> {
        if self.session.cancel.is_cancelled() {
            return Err(InterpreterError::plain("build cancelled"));
        }
        match statement {
            Statement::Command(cmd) => self.interpret_command(cmd).await,
            Statement::If(stmt) => {
                let stmt = stmt.clone();
                self.do_if(&stmt).await
            }
            Statement::For(stmt) => {
                let stmt = stmt.clone();
                self.do_for(&stmt).await
            }
            Statement::Try(stmt) => {
                let stmt = stmt.clone();
                self.do_try(&stmt).await
            }
            Statement::Wait(stmt) => {
                let stmt = stmt.clone();
                self.do_wait(&stmt).await?;
                Ok(false)
            }
            Statement::With(stmt) => {
                let stmt = stmt.clone();
                self.do_with_docker(&stmt).await?;
                Ok(false)
            }
        }
    }

    async fn interpret_command(&mut self, cmd: &Command) -> InterpResult<bool> {
        let loc = cmd.source_location.clone();
        let tag = CommandTag::from_name(&cmd.name, &self.ftrs).ok_or_else(|| {
            InterpreterError::new(loc.as_ref(), format!("unknown command {}", cmd.name))
        })?;

        if !self.first_from_done && !self.locally && !tag.allowed_pre_from() {
            return Err(InterpreterError::new(
                loc.as_ref(),
                format!("{} is not allowed before FROM", cmd.name),
            )
            .with_hint("start the recipe with FROM, FROM DOCKERFILE, or LOCALLY"));
        }
        if self.post_save && matches!(tag, CommandTag::Run | CommandTag::Copy) {
            warn!(
                target: "eb.interp",
                command = %cmd.name,
                "command after SAVE IMAGE does not contribute to the saved image"
            );
        }

        match tag {
            CommandTag::From => self.do_from(cmd).await?,
            CommandTag::FromDockerfile => self.do_from_dockerfile(cmd).await?,
            CommandTag::Locally => self.do_locally(cmd)?,
            CommandTag::Copy | CommandTag::Add => self.do_copy(cmd).await?,
            CommandTag::Run => self.do_run(cmd).await?,
            CommandTag::SaveArtifact => self.do_save_artifact(cmd).await?,
            CommandTag::SaveImage => self.do_save_image(cmd).await?,
            CommandTag::Build => self.do_build(cmd).await?,
            CommandTag::Arg => self.do_arg(cmd).await?,
            CommandTag::Let => self.do_let(cmd).await?,
            CommandTag::Set => self.do_set(cmd).await?,
            CommandTag::Env => self.do_env(cmd).await?,
            CommandTag::Label => self.do_label(cmd).await?,
            CommandTag::Expose => self.do_expose(cmd).await?,
            CommandTag::Cmd => self.do_cmd(cmd).await?,
            CommandTag::Entrypoint => self.do_entrypoint(cmd).await?,
            CommandTag::Workdir => self.do_workdir(cmd).await?,
            CommandTag::User => self.do_user(cmd).await?,
            CommandTag::Volume => self.do_volume(cmd).await?,
            CommandTag::Healthcheck => self.do_healthcheck(cmd).await?,
            CommandTag::Shell => self.do_shell(cmd).await?,
            CommandTag::Cache => self.do_cache(cmd).await?,
            CommandTag::GitClone => self.do_git_clone(cmd).await?,
            CommandTag::Do => self.do_do(cmd).await?,
            CommandTag::Command | CommandTag::Function => {
                // Declaration markers; meaningful only as the first command
                // of a function body, where do_do consumes them.
                if self.function_depth == 0 {
                    return Err(InterpreterError::new(
                        loc.as_ref(),
                        format!("{} is only allowed inside function definitions", cmd.name),
                    ));
                }
            }
            CommandTag::Return => {
                if self.function_depth == 0 {
                    return Err(InterpreterError::new(
                        loc.as_ref(),
                        "RETURN is only allowed inside function bodies",
                    ));
                }
                return Ok(true);
            }
            CommandTag::Import => self.do_import(cmd).await?,
            CommandTag::Project => self.do_project(cmd)?,
            CommandTag::Host => self.do_host(cmd).await?,
            CommandTag::Pipeline | CommandTag::Trigger => {
                debug!(target: "eb.interp", command = %cmd.name, "declarative command recorded");
            }
        }
        Ok(false)
    }

    // -- expansion -------------------------------------------------------

    async fn expand(&mut self, input: &str, lenient: bool) -> InterpResult<String> {
        let segments = parse_expansion(input)?;
        let mut out = String::with_capacity(input.len());
        for segment in segments {
            match segment {
                ExpandSegment::Literal(s) => out.push_str(&s),
                ExpandSegment::Var(name) => match self.collection.get_active(&name) {
                    Some(v) => out.push_str(&v),
                    None if lenient => {}
                    None => {
                        return Err(InterpreterError::plain(format!(
                            "unable to expand: {name} is not defined"
                        )));
                    }
                },
                ExpandSegment::Shell(cmd) => {
                    if !self.ftrs.shell_out_anywhere {
                        return Err(InterpreterError::plain(format!(
                            "$({cmd}) requires the --shell-out-anywhere feature"
                        )));
                    }
                    let probe = self
                        .session
                        .engine
                        .exec_probe(&self.state, &cmd)
                        .await
                        .map_err(|e| InterpreterError::plain(e.to_string()))?;
                    if probe.exit_code != 0 {
                        return Err(InterpreterError::plain(format!(
                            "$({cmd}) exited with code {}",
                            probe.exit_code
                        )));
                    }
                    out.push_str(probe.stdout.trim_end_matches('\n'));
                }
            }
        }
        Ok(out)
    }

    async fn expand_args(&mut self, args: &[String], lenient: bool) -> InterpResult<Vec<String>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.expand(arg, lenient).await?);
        }
        Ok(out)
    }

    // -- reference helpers ----------------------------------------------

    fn resolve_target_ref(&self, raw: &str) -> InterpResult<(Target, bool, bool)> {
        let parsed =
            Target::parse(raw).map_err(|e| InterpreterError::plain(e.to_string()))?;
        let derefed = self
            .imports
            .deref(&parsed)
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
        let joined = join_references(&self.target, &derefed.target)
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
        Ok((
            joined,
            derefed.allow_privileged,
            derefed.allow_privileged_set,
        ))
    }

    fn child_allow_privileged(&self, child: &Target, flag: bool) -> bool {
        if child.is_remote() {
            self.allow_privileged && flag
        } else {
            self.allow_privileged
        }
    }

    async fn build_args_scope(
        &mut self,
        build_args: &[String],
        pass_args: bool,
    ) -> InterpResult<Scope> {
        let mut explicit = Scope::new();
        for entry in build_args {
            let expanded = self.expand(entry, false).await?;
            match expanded.split_once('=') {
                Some((k, v)) => {
                    explicit.add_active(k, v);
                }
                None => {
                    // `--build-arg K` passes the current value through.
                    if let Some(v) = self.collection.get_active(&expanded) {
                        explicit.add_active(expanded.as_str(), v);
                    }
                }
            }
        }
        if pass_args && self.ftrs.pass_args {
            let inherited = combine_scopes(&[
                &explicit,
                self.collection.overriding(),
                self.collection.frame_args(),
            ]);
            return Ok(inherited);
        }
        Ok(explicit)
    }

    fn current_platform(&self) -> Platform {
        self.platr.current_platform()
    }

    async fn child_platform(&mut self, flag: &str) -> InterpResult<Option<Platform>> {
        if flag.is_empty() {
            return Ok(Some(self.current_platform()));
        }
        let expanded = self.expand(flag, false).await?;
        let spec =
            PlatformSpec::parse(&expanded).map_err(|e| InterpreterError::plain(e.to_string()))?;
        Ok(Some(self.platr.materialize(&spec)))
    }

    fn provenance(&self) -> String {
        self.target.string_canonical()
    }

    fn innermost_wait_block(&self) -> Option<&Arc<WaitBlock>> {
        self.wait_stack.last()
    }

    // -- command handlers ------------------------------------------------

    async fn do_from(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<FromOpts>(&args)?;
        let Some(raw_ref) = positional.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "FROM requires a reference",
            ));
        };

        // Explicit --platform switches this conversion's platform too.
        if !opts.platform.is_empty() {
            let spec = PlatformSpec::parse(&opts.platform)
                .map_err(|e| InterpreterError::plain(e.to_string()))?;
            let concrete = self.platr.materialize(&spec);
            self.platr
                .update_platform(PlatformSpec::Specific(concrete));
            set_platform_args_on(&mut self.collection, &self.platr);
        }

        let (raw_ref, extra_args) = if eb_flag::is_in_params_form(raw_ref) {
            let (target, extra) = parse_params(raw_ref)?;
            (target, extra)
        } else {
            (raw_ref.clone(), Vec::new())
        };

        if raw_ref == "scratch" {
            self.state = State::scratch();
            self.image_config = ImageConfig::default();
        } else if raw_ref.contains('+') {
            let (child, import_priv, import_priv_set) = self.resolve_target_ref(&raw_ref)?;
            let mut build_args = opts.build_args.clone();
            build_args.extend(collect_build_args(&extra_args));
            build_args.extend(collect_build_args(&positional[1..]));
            let overriding = self.build_args_scope(&build_args, opts.pass_args).await?;
            let allow = if import_priv_set {
                self.allow_privileged && import_priv
            } else {
                self.child_allow_privileged(&child, opts.allow_privileged)
            };
            let platform = self.child_platform(&opts.platform).await?;

            let outputs = build_target_impl(
                &self.session,
                &child,
                platform,
                overriding,
                allow,
                &self.chain,
            )
            .await?;
            self.state = outputs.final_state.clone();
            self.image_config = outputs.image_config.clone();
            register_outputs(
                &self.session.engine,
                self.current_or_base_block(),
                &outputs,
                self.session.push_mode,
                false,
            );
        } else {
            let platform = self.current_platform();
            let resolved = self
                .session
                .meta_resolver
                .resolve_image_config(
                    &raw_ref,
                    ResolveImageOpt {
                        platform: platform.to_string(),
                    },
                )
                .await
                .map_err(|e| InterpreterError::new(cmd.source_location.as_ref(), e.to_string()))?;
            self.image_config = resolved.config.clone();
            self.state = State::source(
                Op::Image {
                    reference: raw_ref.clone(),
                    resolved_digest: resolved.digest,
                },
                platform,
                &self.provenance(),
            );
        }

        self.first_from_done = true;
        self.post_save = false;
        Ok(())
    }

    async fn do_from_dockerfile(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<FromDockerfileOpts>(&args)?;
        let context_path = positional
            .first()
            .cloned()
            .unwrap_or_else(|| ".".to_string());
        let dockerfile = if opts.path.is_empty() {
            format!("{}/Dockerfile", context_path.trim_end_matches('/'))
        } else {
            opts.path.clone()
        };

        let platform = self.current_platform();
        let local = State::source(
            Op::Local {
                name: format!("context:{}", self.target.project_canonical()),
                include_patterns: Vec::new(),
                exclude_patterns: self.context.excludes.clone(),
            },
            platform.clone(),
            &self.provenance(),
        );
        let mut command = vec![
            "dockerfile-build".to_string(),
            dockerfile,
            context_path,
        ];
        if !opts.target.is_empty() {
            command.push(format!("--target={}", opts.target));
        }
        for build_arg in &opts.build_args {
            command.push(format!("--build-arg={build_arg}"));
        }
        self.state = local.append(
            Op::Run(RunOp {
                command,
                ..RunOp::default()
            }),
            platform,
            &self.provenance(),
        );
        self.image_config = ImageConfig::default();
        self.first_from_done = true;
        self.post_save = false;
        Ok(())
    }

    fn do_locally(&mut self, _cmd: &Command) -> InterpResult<()> {
        self.locally = true;
        self.state = State::scratch();
        self.collection.set_builtin(eb_vars::reserved::LOCALLY, "true");
        self.first_from_done = true;
        Ok(())
    }

    async fn do_copy(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<CopyOpts>(&args)?;
        if positional.len() < 2 {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "COPY requires at least one source and a destination",
            ));
        }
        let (srcs, dest) = positional.split_at(positional.len() - 1);
        let dest = dest[0].clone();
        let platform = self.current_platform();
        let link = self.ftrs.use_copy_link;

        for src in srcs {
            if src.contains('+') {
                // Target-artifact source.
                let (raw_target, extra_args) = if eb_flag::is_in_params_form(src) {
                    parse_params(src)?
                } else {
                    (src.clone(), Vec::new())
                };
                let artifact = Artifact::parse(&raw_target)
                    .map_err(|e| InterpreterError::plain(e.to_string()))?;
                let (child, _, _) = self.resolve_target_ref(&artifact.target.string())?;
                let mut build_args = opts.build_args.clone();
                build_args.extend(collect_build_args(&extra_args));
                let overriding = self.build_args_scope(&build_args, opts.pass_args).await?;
                let allow = self.child_allow_privileged(&child, opts.allow_privileged);
                let child_platform = self.child_platform(&opts.platform).await?;

                let outputs = build_target_impl(
                    &self.session,
                    &child,
                    child_platform,
                    overriding,
                    allow,
                    &self.chain,
                )
                .await?;
                register_outputs(
                    &self.session.engine,
                    self.current_or_base_block(),
                    &outputs,
                    self.session.push_mode,
                    false,
                );

                let Some(save) = find_artifact(&outputs, &artifact.artifact) else {
                    if opts.if_exists {
                        debug!(
                            target: "eb.interp",
                            artifact = %artifact.string(),
                            "skipping missing artifact (--if-exists)"
                        );
                        continue;
                    }
                    return Err(InterpreterError::new(
                        cmd.source_location.as_ref(),
                        format!("artifact {} not found", artifact.string()),
                    ));
                };

                self.state = self.state.append_with_inputs(
                    Op::Copy(CopyOp {
                        src: vec![save.src_path.clone()],
                        dest: dest.clone(),
                        dir_copy: opts.is_dir_copy,
                        chown: opts.chown.clone(),
                        chmod: self.chmod_value(&opts)?,
                        keep_ts: opts.keep_ts,
                        keep_own: opts.keep_own || self.ftrs.save_artifact_keep_own,
                        symlink_no_follow: opts.symlink_no_follow,
                        link,
                    }),
                    vec![self.state.clone(), save.state.clone()],
                    platform.clone(),
                    &self.provenance(),
                    Vec::new(),
                );
            } else {
                // Local build-context source.
                let include_patterns = if self.ftrs.use_copy_include_patterns {
                    vec![src.clone()]
                } else {
                    Vec::new()
                };
                let local = State::source(
                    Op::Local {
                        name: format!("context:{}", self.target.project_canonical()),
                        include_patterns,
                        exclude_patterns: self.context.excludes.clone(),
                    },
                    platform.clone(),
                    &self.provenance(),
                );
                self.state = self.state.append_with_inputs(
                    Op::Copy(CopyOp {
                        src: vec![src.clone()],
                        dest: dest.clone(),
                        dir_copy: opts.is_dir_copy,
                        chown: opts.chown.clone(),
                        chmod: self.chmod_value(&opts)?,
                        keep_ts: opts.keep_ts,
                        keep_own: opts.keep_own,
                        symlink_no_follow: opts.symlink_no_follow,
                        link,
                    }),
                    vec![self.state.clone(), local],
                    platform.clone(),
                    &self.provenance(),
                    Vec::new(),
                );
            }
        }
        Ok(())
    }

    fn chmod_value(&self, opts: &CopyOpts) -> InterpResult<String> {
        if opts.chmod.is_empty() {
            return Ok(String::new());
        }
        if !self.ftrs.use_chmod {
            return Err(InterpreterError::plain(
                "the --chmod flag requires the use-chmod feature",
            ));
        }
        Ok(opts.chmod.clone())
    }

    async fn do_run(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<RunOpts>(&args)?;

        if opts.interactive && opts.interactive_keep {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "--interactive and --interactive-keep are mutually exclusive",
            ));
        }
        if self.interactive_done && (opts.interactive || opts.interactive_keep) {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "only one interactive session is allowed per build",
            ));
        }
        if !opts.network.is_empty() {
            if !self.ftrs.no_network {
                return Err(InterpreterError::plain(
                    "--network requires the no-network feature",
                ));
            }
            if opts.network != "none" {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    format!("unsupported network mode {:?}", opts.network),
                ));
            }
        }
        if opts.with_aws && !self.ftrs.run_with_aws {
            return Err(InterpreterError::plain(
                "--aws requires the run-with-aws feature",
            ));
        }
        if !opts.oidc.is_empty() && !self.ftrs.run_with_aws_oidc {
            return Err(InterpreterError::plain(
                "--oidc requires the run-with-aws-oidc feature",
            ));
        }
        if opts.raw_output && !self.ftrs.raw_output {
            return Err(InterpreterError::plain(
                "--raw-output requires the raw-output feature",
            ));
        }
        if opts.privileged && !self.allow_privileged {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "--privileged requires --allow-privileged",
            ));
        }

        let command = if cmd.exec_mode {
            let mut command = positional.clone();
            if opts.with_entrypoint {
                let mut with_ep = self.image_config.entrypoint.clone();
                with_ep.extend(command);
                command = with_ep;
            }
            command
        } else {
            let shell = if self.image_config.shell.is_empty() {
                vec!["/bin/sh".to_string(), "-c".to_string()]
            } else {
                self.image_config.shell.clone()
            };
            let mut command = shell;
            command.push(positional.join(" "));
            command
        };

        let mut mounts = self.cache_mounts.clone();
        for mount in &opts.mounts {
            mounts.push(parse_mount(mount)?);
        }

        let run_op = RunOp {
            command: command.clone(),
            env: self.run_env(),
            working_dir: self.image_config.working_dir.clone(),
            user: self.image_config.user.clone(),
            mounts,
            secrets: opts.secrets.clone(),
            network: if opts.network == "none" {
                NetworkMode::None
            } else {
                NetworkMode::Sandbox
            },
            privileged: opts.privileged,
            ssh: opts.with_ssh,
            aws: opts.with_aws,
            oidc: opts.oidc.clone(),
            no_cache: opts.no_cache,
        };

        if opts.push {
            // Deferred: recorded against the current state, does not mutate
            // it. Executed only if the whole build succeeds in push mode.
            let push_record = RunPush {
                state: self.state.clone(),
                command: positional.join(" "),
                waited: false,
            };
            self.register_run_push(push_record);
            return Ok(());
        }

        self.state = self.state.append(
            Op::Run(run_op),
            self.current_platform(),
            &self.provenance(),
        );
        if opts.interactive || opts.interactive_keep {
            // Interactive sessions must be the terminal action on their
            // state; later mutations would invalidate the session.
            self.interactive_done = true;
        }
        Ok(())
    }

    fn run_env(&self) -> Vec<String> {
        let mut env = self.image_config.env.clone();
        for (host, ip) in &self.hosts {
            env.push(format!("EB_HOST_{host}={ip}"));
        }
        env
    }

    fn register_run_push(&mut self, mut record: RunPush) {
        if let Some(block) = self.innermost_wait_block() {
            let item = Arc::new(RunPushItem::new(
                Arc::clone(&self.session.engine),
                record.state.clone(),
                &record.command,
            ));
            if self.session.push_mode {
                item.set_do_push();
            }
            block.add_item(item);
            record.waited = true;
        }
        self.outputs.run_pushes.push(record);
    }

    async fn do_save_artifact(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<SaveArtifactOpts>(&args)?;

        // Grammar: SAVE ARTIFACT src [artifact-path] [AS LOCAL local-path]
        let mut local_dest = None;
        let mut head = positional.as_slice();
        if let Some(as_idx) = positional.iter().position(|t| t == "AS") {
            if positional.get(as_idx + 1).map(String::as_str) != Some("LOCAL")
                || positional.len() != as_idx + 3
            {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    "expected AS LOCAL <path>",
                ));
            }
            local_dest = Some(positional[as_idx + 2].clone());
            head = &positional[..as_idx];
        }
        let (src, artifact_path) = match head {
            [src] => (src.clone(), default_artifact_path(src)),
            [src, dest] => (src.clone(), normalize_artifact_dest(src, dest)),
            _ => {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    "SAVE ARTIFACT requires a source",
                ));
            }
        };

        if let Some(dest) = &local_dest
            && self.ftrs.require_force_for_unsafe_saves
            && !opts.force
            && is_unsafe_local_dest(dest)
        {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                format!("saving to {dest} outside the current directory requires --force"),
            ));
        }

        let mut record = SaveArtifact {
            state: self.state.clone(),
            src_path: src,
            artifact_path,
            local_dest,
            if_exists: opts.if_exists,
            force: opts.force,
            waited: false,
        };
        if record.local_dest.is_some()
            && let Some(block) = self.innermost_wait_block()
        {
            let item = Arc::new(StateSyncItem::new(
                Arc::clone(&self.session.engine),
                record.state.clone(),
            ));
            item.set_do_save();
            block.add_item(item);
            record.waited = true;
        }
        self.outputs.save_artifacts.push(record);
        Ok(())
    }

    async fn do_save_image(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, names) = parse_args_cleaned::<SaveImageOpts>(&args)?;

        if opts.no_manifest_list && !self.ftrs.use_no_manifest_list {
            return Err(InterpreterError::plain(
                "--no-manifest-list requires the use-no-manifest-list feature",
            ));
        }
        if opts.without_earthly_labels && !self.ftrs.allow_without_earthly_labels {
            return Err(InterpreterError::plain(
                "--without-earthly-labels requires the allow-without-earthly-labels feature",
            ));
        }

        let mut config = self.image_config.clone();
        if !opts.without_earthly_labels {
            config.labels.insert(
                "dev.earthbuild.target".to_string(),
                self.target.string_canonical(),
            );
        }

        let mut record = SaveImage {
            state: self.state.clone(),
            config,
            names: names.clone(),
            push: opts.push,
            cache_hint: opts.cache_hint,
            insecure: opts.insecure,
            no_manifest_list: opts.no_manifest_list,
            cache_from: opts.cache_from.clone(),
            without_earthly_labels: opts.without_earthly_labels,
            waited: false,
        };
        if let Some(block) = self.innermost_wait_block() {
            for name in &names {
                let item = Arc::new(ImagePushItem::new(
                    Arc::clone(&self.session.engine),
                    record.state.clone(),
                    name,
                    record.insecure,
                ));
                if record.push && self.session.push_mode {
                    item.set_do_push();
                }
                block.add_item(item);
            }
            record.waited = true;
        }
        self.outputs.save_images.push(record);
        self.post_save = true;
        Ok(())
    }

    async fn do_build(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<BuildOpts>(&args)?;
        let Some(raw_ref) = positional.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "BUILD requires a target reference",
            ));
        };
        if opts.auto_skip && !self.ftrs.build_auto_skip {
            return Err(InterpreterError::plain(
                "--auto-skip requires the build-auto-skip feature",
            ));
        }

        let (raw_ref, extra_args) = if eb_flag::is_in_params_form(raw_ref) {
            parse_params(raw_ref)?
        } else {
            (raw_ref.clone(), Vec::new())
        };
        let (child, import_priv, import_priv_set) = self.resolve_target_ref(&raw_ref)?;
        let allow = if import_priv_set {
            self.allow_privileged && import_priv
        } else {
            self.child_allow_privileged(&child, opts.allow_privileged)
        };
        let mut build_args = opts.build_args.clone();
        build_args.extend(collect_build_args(&extra_args));
        build_args.extend(collect_build_args(&positional[1..]));
        let overriding = self.build_args_scope(&build_args, opts.pass_args).await?;

        let mut platforms = Vec::new();
        for value in &opts.platforms {
            for part in split_flag_values(value) {
                let spec = PlatformSpec::parse(&part)
                    .map_err(|e| InterpreterError::plain(e.to_string()))?;
                platforms.push(self.platr.materialize(&spec));
            }
        }
        if platforms.is_empty() {
            platforms.push(self.current_platform());
        }

        // Multi-platform builds convert concurrently, bounded by the
        // session's parallelism setting.
        let parallelism = self.session.conversion_parallelism.max(1);
        let results: Vec<InterpResult<Arc<TargetOutputs>>> = stream::iter(platforms)
            .map(|platform| {
                build_target_impl(
                    &self.session,
                    &child,
                    Some(platform),
                    overriding.clone(),
                    allow,
                    &self.chain,
                )
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        for outputs in results {
            let outputs = outputs?;
            // BUILD never touches the current state; its side effects flow
            // through the enclosing wait block.
            register_outputs(
                &self.session.engine,
                self.current_or_base_block(),
                &outputs,
                self.session.push_mode,
                self.session.local_outputs,
            );
        }
        Ok(())
    }

    async fn do_arg(&mut self, cmd: &Command) -> InterpResult<()> {
        // Only the default value position is expanded (leniently); the name
        // must stay literal.
        let (opts, name, default) = parse_arg_args(
            &cmd.args,
            self.in_base_recipe,
            self.ftrs.explicit_global,
        )?;
        let default = match default {
            Some(raw) => Some(self.expand(&raw, true).await?),
            None => None,
        };
        self.collection
            .declare_arg(&name, default.as_deref(), opts.required, opts.global)
            .map_err(|e| InterpreterError::new(cmd.source_location.as_ref(), e.to_string()))?;
        Ok(())
    }

    async fn do_let(&mut self, cmd: &Command) -> InterpResult<()> {
        if !self.ftrs.arg_scope_set {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "LET requires the arg-scope-and-set feature",
            ));
        }
        let (name, value) = parse_key_value(&process_params_and_quotes(&cmd.args))?;
        let Some(value) = value else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "LET requires a value",
            ));
        };
        let value = self.expand(&value, false).await?;
        self.collection
            .declare_let(&name, &value)
            .map_err(|e| InterpreterError::new(cmd.source_location.as_ref(), e.to_string()))?;
        Ok(())
    }

    async fn do_set(&mut self, cmd: &Command) -> InterpResult<()> {
        if !self.ftrs.arg_scope_set {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "SET requires the arg-scope-and-set feature",
            ));
        }
        let (name, value) = parse_key_value(&process_params_and_quotes(&cmd.args))?;
        let Some(value) = value else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "SET requires a value",
            ));
        };
        let value = self.expand(&value, false).await?;
        self.collection
            .set_existing(&name, &value)
            .map_err(|e| InterpreterError::new(cmd.source_location.as_ref(), e.to_string()))?;
        Ok(())
    }

    async fn do_env(&mut self, cmd: &Command) -> InterpResult<()> {
        let (name, value) = parse_key_value(&cmd.args)?;
        let value = match value {
            Some(raw) => self.expand(&raw, false).await?,
            None => String::new(),
        };
        self.collection
            .declare_env(&name, &value)
            .map_err(|e| InterpreterError::new(cmd.source_location.as_ref(), e.to_string()))?;
        self.image_config.set_env(&name, &value);
        Ok(())
    }

    async fn do_label(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let mut iter = args.chunks_exact(3);
        for chunk in iter.by_ref() {
            if chunk[1] != "=" {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    "LABEL expects key=value pairs",
                ));
            }
            self.image_config
                .labels
                .insert(unquote(&chunk[0]), unquote(&chunk[2]));
        }
        if !iter.remainder().is_empty() {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "LABEL expects key=value pairs",
            ));
        }
        Ok(())
    }

    async fn do_expose(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        for port in args {
            let (num, _proto) = port.split_once('/').unwrap_or((port.as_str(), "tcp"));
            if num.parse::<u16>().is_err() {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    format!("invalid port {port:?}"),
                ));
            }
            self.image_config.exposed_ports.push(port);
        }
        Ok(())
    }

    async fn do_cmd(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        self.image_config.cmd = if cmd.exec_mode {
            args
        } else {
            shell_wrap(&self.image_config.shell, &args)
        };
        Ok(())
    }

    async fn do_entrypoint(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        self.image_config.entrypoint = if cmd.exec_mode {
            args
        } else {
            shell_wrap(&self.image_config.shell, &args)
        };
        Ok(())
    }

    async fn do_workdir(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let Some(dir) = args.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "WORKDIR requires a path",
            ));
        };
        self.image_config.working_dir = dir.clone();
        if !self.locally {
            self.state = self.state.append(
                Op::Mkdir {
                    path: dir.clone(),
                    mode: String::new(),
                },
                self.current_platform(),
                &self.provenance(),
            );
        }
        Ok(())
    }

    async fn do_user(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let Some(user) = args.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "USER requires a name",
            ));
        };
        self.image_config.user = user.clone();
        Ok(())
    }

    async fn do_volume(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        for volume in args {
            self.image_config.volumes.push(volume);
        }
        Ok(())
    }

    async fn do_healthcheck(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<HealthCheckOpts>(&args)?;
        let Some(kind) = positional.first().map(String::as_str) else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "HEALTHCHECK requires NONE or CMD",
            ));
        };
        let test = match kind {
            "NONE" => vec!["NONE".to_string()],
            "CMD" => {
                let mut test = vec!["CMD".to_string()];
                test.extend(positional[1..].iter().cloned());
                test
            }
            other => {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    format!("HEALTHCHECK expects NONE or CMD, got {other:?}"),
                ));
            }
        };
        self.image_config.healthcheck = Some(eb_llb::HealthCheck {
            test,
            interval_secs: opts.interval.as_secs(),
            timeout_secs: opts.timeout.as_secs(),
            start_period_secs: opts.start_period.as_secs(),
            start_interval_secs: opts.start_interval.as_secs(),
            retries: opts.retries,
        });
        Ok(())
    }

    async fn do_shell(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        if args.is_empty() {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "SHELL requires a command",
            ));
        }
        self.image_config.shell = args;
        Ok(())
    }

    async fn do_cache(&mut self, cmd: &Command) -> InterpResult<()> {
        if !self.ftrs.use_cache_command {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "CACHE requires the use-cache-command feature",
            ));
        }
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<CacheOpts>(&args)?;
        let Some(path) = positional.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "CACHE requires a mount point",
            ));
        };
        if !opts.id.is_empty() && !self.ftrs.global_cache {
            return Err(InterpreterError::plain(
                "CACHE --id requires the global-cache feature",
            ));
        }
        if opts.persist && !self.ftrs.cache_persist_option {
            return Err(InterpreterError::plain(
                "CACHE --persist requires the cache-persist-option feature",
            ));
        }
        let sharing = match opts.sharing.as_str() {
            "" | "locked" => CacheSharingMode::Locked,
            "shared" => CacheSharingMode::Shared,
            "private" => CacheSharingMode::Private,
            other => {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    format!("invalid cache sharing mode {other:?}"),
                ));
            }
        };
        let id = if opts.id.is_empty() {
            format!("{}:{path}", self.target.project_canonical())
        } else {
            opts.id.clone()
        };
        self.cache_mounts.push(Mount {
            target: path.clone(),
            kind: MountKind::Cache {
                id,
                sharing,
                mode: opts.mode.clone(),
            },
        });
        Ok(())
    }

    async fn do_git_clone(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<GitCloneOpts>(&args)?;
        let [url, dest] = positional.as_slice() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "GIT CLONE requires a url and a destination",
            ));
        };
        let platform = self.current_platform();
        let git = State::source(
            Op::Git {
                url: url.clone(),
                reference: opts.branch.clone(),
                keep_ts: opts.keep_ts,
            },
            platform.clone(),
            &self.provenance(),
        );
        self.state = self.state.append_with_inputs(
            Op::Copy(CopyOp {
                src: vec![".".to_string()],
                dest: dest.clone(),
                dir_copy: true,
                keep_ts: opts.keep_ts,
                link: self.ftrs.use_copy_link,
                ..CopyOp::default()
            }),
            vec![self.state.clone(), git],
            platform,
            &self.provenance(),
            Vec::new(),
        );
        Ok(())
    }

    async fn do_import(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<ImportOpts>(&args)?;
        let (import_str, alias) = match positional.as_slice() {
            [import_str] => (import_str.clone(), String::new()),
            [import_str, as_kw, alias] if as_kw == "AS" => (import_str.clone(), alias.clone()),
            _ => {
                return Err(InterpreterError::new(
                    cmd.source_location.as_ref(),
                    "expected IMPORT <ref> [AS <alias>]",
                ));
            }
        };
        self.imports
            .add(
                &import_str,
                &alias,
                self.in_base_recipe,
                opts.allow_privileged,
                opts.allow_privileged,
            )
            .map_err(|e| InterpreterError::new(cmd.source_location.as_ref(), e.to_string()))?;
        Ok(())
    }

    fn do_project(&mut self, cmd: &Command) -> InterpResult<()> {
        let Some(raw) = cmd.args.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "PROJECT requires an org/project argument",
            ));
        };
        let Some((org, project)) = raw.split_once('/') else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                format!("PROJECT expects org/project, got {raw:?}"),
            ));
        };
        self.outputs.project = Some((org.to_string(), project.to_string()));
        Ok(())
    }

    async fn do_host(&mut self, cmd: &Command) -> InterpResult<()> {
        if !self.ftrs.use_host_command {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "HOST requires the use-host-command feature",
            ));
        }
        let args = self.expand_args(&cmd.args, false).await?;
        let [hostname, ip] = args.as_slice() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "HOST requires a hostname and an IP",
            ));
        };
        self.hosts.push((hostname.clone(), ip.clone()));
        let contents: String = self
            .hosts
            .iter()
            .map(|(h, i)| format!("{i} {h}\n"))
            .collect();
        self.state = self.state.append(
            Op::Mkfile {
                path: "/etc/hosts.earthbuild".to_string(),
                mode: "0644".to_string(),
                contents: contents.into_bytes(),
            },
            self.current_platform(),
            &self.provenance(),
        );
        Ok(())
    }

    async fn do_do(&mut self, cmd: &Command) -> InterpResult<()> {
        let args = self.expand_args(&cmd.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<DoOpts>(&args)?;
        let Some(raw_ref) = positional.first() else {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                "DO requires a function reference",
            ));
        };

        let (func_file, func_name) = self.resolve_function(raw_ref).await?;
        let function = func_file.function(&func_name).ok_or_else(|| {
            InterpreterError::new(
                cmd.source_location.as_ref(),
                format!("function {func_name} not found"),
            )
        })?;

        // Validate the declaration marker.
        let marker_ok = matches!(
            function.recipe.first(),
            Some(Statement::Command(first))
                if CommandTag::from_name(&first.name, &self.ftrs)
                    .is_some_and(|t| matches!(t, CommandTag::Command | CommandTag::Function))
        );
        if !marker_ok {
            return Err(InterpreterError::new(
                cmd.source_location.as_ref(),
                format!("function {func_name} must start with COMMAND or FUNCTION"),
            ));
        }

        let overriding = self
            .build_args_scope(&collect_build_args(&positional[1..]), opts.pass_args)
            .await?;
        self.collection.enter_frame(overriding);
        self.function_depth += 1;
        let recipe = function.recipe.clone();
        let result = self.interpret_block(&recipe).await;
        self.function_depth -= 1;
        self.collection.exit_frame();
        result.map(|_| ())
    }

    async fn resolve_function(&mut self, raw_ref: &str) -> InterpResult<(Arc<Earthfile>, String)> {
        let (target, _, _) = self.resolve_target_ref(raw_ref)?;
        if !target.is_external() {
            return Ok((Arc::clone(&self.earthfile), target.target));
        }
        let context = self
            .session
            .resolver
            .resolve(&target)
            .await
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
        let parsed = eb_ast::parse_file(&context.build_file_path)
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
        Ok((Arc::new(parsed), target.target))
    }

    // -- block statements -------------------------------------------------

    async fn do_if(&mut self, stmt: &IfStatement) -> InterpResult<bool> {
        let mut arms: Vec<(&[String], &Block)> = vec![(&stmt.expression, &stmt.if_body)];
        for arm in &stmt.else_if {
            arms.push((&arm.expression, &arm.body));
        }

        for (expression, body) in arms {
            if self.eval_condition(expression).await? {
                return self.interpret_block(body).await;
            }
        }
        if let Some(else_body) = &stmt.else_body {
            return self.interpret_block(else_body).await;
        }
        Ok(false)
    }

    async fn eval_condition(&mut self, expression: &[String]) -> InterpResult<bool> {
        let args = self.expand_args(expression, false).await?;
        let (_opts, condition) = parse_args_cleaned::<IfOpts>(&args)?;
        let command = condition.join(" ");
        // The probe runs against a derived state; its filesystem mutations
        // are discarded — both branches see the pre-IF state.
        let probe = self
            .session
            .engine
            .exec_probe(&self.state, &command)
            .await
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
        Ok(probe.exit_code == 0)
    }

    async fn do_for(&mut self, stmt: &ForStatement) -> InterpResult<bool> {
        if !self.ftrs.for_in {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                "FOR requires the for-in feature",
            ));
        }
        let args = self.expand_args(&stmt.args, false).await?;
        let (opts, positional) = parse_args_cleaned::<ForOpts>(&args)?;
        let (variable, in_kw, expression) = match positional.split_first() {
            Some((variable, rest)) if rest.first().map(String::as_str) == Some("IN") => {
                (variable.clone(), &rest[0], rest[1..].to_vec())
            }
            _ => {
                return Err(InterpreterError::new(
                    stmt.source_location.as_ref(),
                    "expected FOR <variable> IN <expression>",
                ));
            }
        };
        debug_assert_eq!(in_kw, "IN");

        let command = expression.join(" ");
        let probe = self
            .session
            .engine
            .exec_probe(&self.state, &command)
            .await
            .map_err(|e| InterpreterError::plain(e.to_string()))?;
        if probe.exit_code != 0 {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                format!("FOR expression exited with code {}", probe.exit_code),
            ));
        }

        let separators: Vec<char> = opts.separators.chars().collect();
        let tokens: Vec<&str> = probe
            .stdout
            .split(|c| separators.contains(&c))
            .filter(|t| !t.is_empty())
            .collect();

        // Bodies run serially, each with the variable bound in a fresh
        // inner scope, composing LLB states.
        for token in tokens {
            self.collection.enter_frame(Scope::new());
            self.collection
                .declare_let(&variable, token)
                .map_err(|e| InterpreterError::new(stmt.source_location.as_ref(), e.to_string()))?;
            let result = self.interpret_block(&stmt.body.clone()).await;
            self.collection.exit_frame();
            if result? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn do_try(&mut self, stmt: &TryStatement) -> InterpResult<bool> {
        if !self.ftrs.try_finally {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                "TRY requires the try feature",
            ));
        }

        // CATCH observes the pre-TRY state; remember it before the body.
        let pre_try_state = self.state.clone();
        let pre_try_config = self.image_config.clone();

        let body_result = self.interpret_block(&stmt.try_body.clone()).await;
        let try_failed = match body_result {
            Ok(_) => {
                // Conversion succeeded; the body's RUNs are only exercised
                // at solve time. Force them now so CATCH can react.
                let solved = crate::waititems::solve_now(&self.session.engine, &self.state).await;
                solved.is_err()
            }
            Err(_) => true,
        };

        if try_failed {
            self.state = pre_try_state;
            self.image_config = pre_try_config;
            if let Some(catch_body) = &stmt.catch_body {
                self.interpret_block(&catch_body.clone()).await?;
            }
        }
        if let Some(finally_body) = &stmt.finally_body {
            self.interpret_block(&finally_body.clone()).await?;
        }
        Ok(false)
    }

    async fn do_wait(&mut self, stmt: &WaitStatement) -> InterpResult<()> {
        if !self.ftrs.wait_block {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                "WAIT requires the wait-block feature",
            ));
        }
        let block = Arc::new(WaitBlock::new());
        self.wait_stack.push(Arc::clone(&block));
        let result = self.interpret_block(&stmt.body.clone()).await;
        self.wait_stack.pop();
        result?;

        // The current state must complete before execution resumes past
        // END.
        block.add_item(Arc::new(StateSyncItem::new(
            Arc::clone(&self.session.engine),
            self.state.clone(),
        )));
        block
            .wait(&self.session.cancel)
            .await
            .map_err(|e| InterpreterError::new(stmt.source_location.as_ref(), format!("{e:#}")))?;
        Ok(())
    }

    async fn do_with_docker(&mut self, stmt: &WithStatement) -> InterpResult<()> {
        if stmt.command.name != "DOCKER" {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                format!("WITH only supports DOCKER, got {}", stmt.command.name),
            ));
        }
        let args = self.expand_args(&stmt.command.args, false).await?;
        let (opts, _) = parse_args_cleaned::<WithDockerOpts>(&args)?;
        if !opts.cache_id.is_empty() && !self.ftrs.docker_cache {
            return Err(InterpreterError::plain(
                "--cache-id requires the docker-cache feature",
            ));
        }

        // Loads: build each referenced target, mount its state for the
        // embedded daemon to load.
        let mut load_mounts = Vec::new();
        let mut load_states = vec![self.state.clone()];
        for load in &opts.loads {
            let (_image, target_str, extra) = parse_load(load)?;
            let (child, _, _) = self.resolve_target_ref(&target_str)?;
            let mut build_args = opts.build_args.clone();
            build_args.extend(collect_build_args(&extra));
            let overriding = self.build_args_scope(&build_args, opts.pass_args).await?;
            let allow = self.child_allow_privileged(&child, opts.allow_privileged);
            let platform = self.child_platform(&opts.platform).await?;
            let outputs = build_target_impl(
                &self.session,
                &child,
                platform,
                overriding,
                allow,
                &self.chain,
            )
            .await?;
            register_outputs(
                &self.session.engine,
                self.current_or_base_block(),
                &outputs,
                self.session.push_mode,
                false,
            );
            load_mounts.push(Mount {
                target: format!("/var/lib/earthbuild/loads/{}", load_mounts.len()),
                kind: MountKind::Layer {
                    input: load_states.len(),
                },
            });
            load_states.push(outputs.final_state.clone());
        }
        for pull in &opts.pulls {
            self.session
                .meta_resolver
                .resolve_image_config(
                    pull,
                    ResolveImageOpt {
                        platform: self.current_platform().to_string(),
                    },
                )
                .await
                .map_err(|e| InterpreterError::plain(e.to_string()))?;
        }

        // The body must be a single RUN.
        let [Statement::Command(run_cmd)] = stmt.body.as_slice() else {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                "WITH DOCKER body must be a single RUN command",
            ));
        };
        if run_cmd.name != "RUN" {
            return Err(InterpreterError::new(
                stmt.source_location.as_ref(),
                "WITH DOCKER body must be a single RUN command",
            ));
        }

        let run_args = self.expand_args(&run_cmd.args, false).await?;
        let (run_opts, positional) = parse_args_cleaned::<RunOpts>(&run_args)?;
        let mut mounts = self.cache_mounts.clone();
        mounts.extend(load_mounts);
        if !opts.cache_id.is_empty() {
            mounts.push(Mount {
                target: "/var/lib/docker".to_string(),
                kind: MountKind::Cache {
                    id: opts.cache_id.clone(),
                    sharing: CacheSharingMode::Locked,
                    mode: "0644".to_string(),
                },
            });
        }
        for mount in &run_opts.mounts {
            mounts.push(parse_mount(mount)?);
        }

        let shell = if self.image_config.shell.is_empty() {
            vec!["/bin/sh".to_string(), "-c".to_string()]
        } else {
            self.image_config.shell.clone()
        };
        let mut command = shell;
        command.push(positional.join(" "));

        self.state = self.state.append_with_inputs(
            Op::Run(RunOp {
                command,
                env: self.run_env(),
                working_dir: self.image_config.working_dir.clone(),
                user: self.image_config.user.clone(),
                mounts,
                secrets: run_opts.secrets.clone(),
                network: NetworkMode::Sandbox,
                privileged: true,
                ssh: run_opts.with_ssh,
                aws: run_opts.with_aws,
                oidc: run_opts.oidc.clone(),
                no_cache: run_opts.no_cache,
            }),
            load_states,
            self.current_platform(),
            &self.provenance(),
            Vec::new(),
        );
        Ok(())
    }

    fn current_or_base_block(&self) -> &WaitBlock {
        match self.wait_stack.last() {
            Some(block) => block,
            None => &self.session.base_wait_block,
        }
    }
}

// -- helpers --------------------------------------------------------------

fn set_platform_args_on(collection: &mut Collection, platr: &PlatformResolver) {
    let mut scope = Scope::new();
    set_platform_args(&mut scope, platr);
    for (name, value) in scope.as_map(eb_vars::ScopeOpts::active()) {
        collection.set_builtin(&name, &value);
    }
}

fn collect_build_args(tokens: &[String]) -> Vec<String> {
    // Params-form extra args arrive as `--build-arg K=V` or bare `K=V`.
    let mut out = Vec::new();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        if let Some(rest) = token.strip_prefix("--build-arg") {
            match rest.strip_prefix('=') {
                Some(value) => out.push(value.to_string()),
                None => {
                    if let Some(next) = iter.next() {
                        out.push(next.clone());
                    }
                }
            }
        } else if let Some(rest) = token.strip_prefix("--") {
            // `(+target --name=value)` form.
            out.push(rest.to_string());
        } else {
            out.push(token.clone());
        }
    }
    out
}

fn find_artifact<'o>(outputs: &'o TargetOutputs, artifact_path: &str) -> Option<&'o SaveArtifact> {
    let wanted = artifact_path.trim_start_matches('/');
    outputs
        .save_artifacts
        .iter()
        .find(|save| save.artifact_path.trim_start_matches('/') == wanted)
}

fn default_artifact_path(src: &str) -> String {
    let base = src.trim_end_matches('/').rsplit('/').next().unwrap_or(src);
    format!("/{base}")
}

fn normalize_artifact_dest(src: &str, dest: &str) -> String {
    if dest.ends_with('/') {
        let base = src.trim_end_matches('/').rsplit('/').next().unwrap_or(src);
        return format!("/{}{base}", dest.trim_start_matches('/'));
    }
    format!("/{}", dest.trim_start_matches('/'))
}

fn is_unsafe_local_dest(dest: &str) -> bool {
    if dest.starts_with('/') {
        return true;
    }
    normalize_path(dest).starts_with("..")
}

fn unquote(s: &str) -> String {
    let stripped = s
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')));
    stripped.unwrap_or(s).to_string()
}

fn shell_wrap(shell: &[String], args: &[String]) -> Vec<String> {
    let mut out = if shell.is_empty() {
        vec!["/bin/sh".to_string(), "-c".to_string()]
    } else {
        shell.to_vec()
    };
    out.push(args.join(" "));
    out
}

fn parse_mount(mount: &str) -> InterpResult<Mount> {
    // `type=cache,target=/x[,id=...][,sharing=...]` and
    // `type=secret,id=...,target=/y` and `type=tmpfs,target=/z`.
    let mut kind_str = String::new();
    let mut target = String::new();
    let mut id = String::new();
    let mut sharing = CacheSharingMode::Locked;
    let mut mode = String::new();
    for part in mount.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| InterpreterError::plain(format!("invalid mount spec {mount:?}")))?;
        match key {
            "type" => kind_str = value.to_string(),
            "target" | "dst" => target = value.to_string(),
            "id" => id = value.to_string(),
            "mode" | "chmod" => mode = value.to_string(),
            "sharing" => {
                sharing = match value {
                    "locked" => CacheSharingMode::Locked,
                    "shared" => CacheSharingMode::Shared,
                    "private" => CacheSharingMode::Private,
                    other => {
                        return Err(InterpreterError::plain(format!(
                            "invalid mount sharing mode {other:?}"
                        )));
                    }
                }
            }
            _ => {}
        }
    }
    if target.is_empty() {
        return Err(InterpreterError::plain(format!(
            "mount spec {mount:?} requires a target"
        )));
    }
    let kind = match kind_str.as_str() {
        "cache" => MountKind::Cache {
            id: if id.is_empty() { target.clone() } else { id },
            sharing,
            mode: if mode.is_empty() {
                "0644".to_string()
            } else {
                mode
            },
        },
        "secret" => MountKind::Secret { id },
        "ssh" => MountKind::Ssh,
        "tmpfs" => MountKind::Tmpfs,
        other => {
            return Err(InterpreterError::plain(format!(
                "unsupported mount type {other:?}"
            )));
        }
    };
    Ok(Mount { target, kind })
}
