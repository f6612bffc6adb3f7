// SPDX-License-Identifier: MIT OR Apache-2.0
//! The CLI verbs.

use crate::{BuildArgs, config, envfile, offline::OfflineEngine};
use anyhow::Context;
use eb_builder::{BuildOpt, Builder, InputGraphSkipChecker, OutputHandlers};
use eb_context::ContextResolver;
use eb_domain::{Artifact, Target};
use eb_error::HintError;
use eb_flag::redact_secrets;
use eb_inputgraph::SkipDb;
use eb_interp::{AutoSkipChecker, BuildSession};
use eb_platform::Platform;
use eb_sync::CancelToken;
use eb_vars::{DefaultArgs, Scope};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Version baked into `EARTHLY_VERSION`.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `build` verb (also the default verb).
pub async fn build(args: BuildArgs, cancel: CancelToken) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("resolving cwd")?;
    let cfg = config::load_config()?;

    // Invocation log, secrets redacted.
    let argv: Vec<String> = std::env::args().collect();
    info!(target: "eb.cli", argv = ?redact_secrets(&argv), "invoked");

    let env_overlay = envfile::load_env_file(&cwd.join(&args.env_file))?;
    let overriding = build_arg_scope(&args, &cwd, &env_overlay)?;
    let secrets = secret_map(&args, &cwd, &env_overlay)?;

    // The --artifact form names both the target and the artifact to pull.
    let (target, final_artifact_dest) = match &args.artifact {
        Some(artifact_ref) => {
            let artifact = Artifact::parse(artifact_ref)
                .map_err(|e| anyhow::anyhow!("invalid --artifact reference: {e}"))?;
            (artifact.target, Some(args.artifact_dest.clone()))
        }
        None => {
            let raw = args
                .target
                .as_deref()
                .context("no target reference given; try `earthbuild +<target>`")?;
            (
                Target::parse(raw).map_err(|e| anyhow::anyhow!("invalid target: {e}"))?,
                None,
            )
        }
    };

    let platform = match &args.platform {
        Some(p) => Some(Platform::parse(p).map_err(|e| anyhow::anyhow!("{e}"))?),
        None => None,
    };

    let engine: Arc<dyn eb_llb::BuildEngine> = Arc::new(OfflineEngine::new());
    let resolver = Arc::new(ContextResolver::new(
        cwd.clone(),
        config::installation_dir().join("clones"),
    ));

    let mut session = BuildSession::new(engine, resolver)
        .with_push(args.push)
        .with_ci(args.ci)
        .with_allow_privileged(args.allow_privileged)
        .with_overriding_vars(overriding.clone());
    session.cancel = cancel;
    session.local_outputs = !args.no_output || args.output;
    session.conversion_parallelism = cfg.conversion_parallelism;
    session.default_args = DefaultArgs {
        earthly_version: VERSION.to_string(),
        earthly_build_sha: option_env!("EARTHBUILD_BUILD_SHA").unwrap_or("dev").to_string(),
    };
    session.feature_flag_overrides = args
        .feature_flag_overrides
        .clone()
        .unwrap_or_else(|| cfg.feature_flag_overrides.clone());

    let auto_skip_enabled = (args.auto_skip || cfg.auto_skip) && !args.no_auto_skip;
    let skip_checker = if auto_skip_enabled {
        let db = Arc::new(SkipDb::open(&config::skip_db_path())?);
        let checker = Arc::new(InputGraphSkipChecker::new(
            db,
            cwd.clone(),
            session.default_args.clone(),
            args.ci,
            args.push,
        ));
        session.auto_skip = Some(Arc::clone(&checker) as Arc<dyn AutoSkipChecker>);
        Some(checker)
    } else {
        None
    };

    let session = Arc::new(session);

    // Short-circuit the whole build when the root fingerprint is known.
    if let Some(checker) = &skip_checker
        && checker.should_skip(&target, &overriding).await
    {
        println!("Target {} unchanged; skipping.", target.string());
        return Ok(());
    }

    let builder = Builder::new(Arc::clone(&session));
    let handlers = OutputHandlers {
        on_image: Some(Box::new(|name| {
            println!("Image output as {name}");
        })),
        on_artifact: Some(Box::new(|artifact, dest| {
            println!("Artifact {artifact} output as {dest}");
        })),
        on_final_artifact: Some(Box::new(|dest| {
            println!("Artifact output as {dest}");
        })),
    };

    builder
        .build(
            &target,
            BuildOpt {
                platform,
                overriding_vars: overriding.clone(),
                cache_imports: args
                    .remote_cache
                    .iter()
                    .cloned()
                    .collect(),
                cache_export: if args.remote_cache.is_some() && !args.max_remote_cache {
                    args.remote_cache.clone().unwrap_or_default()
                } else {
                    String::new()
                },
                max_cache_export: if args.max_remote_cache {
                    args.remote_cache.clone().unwrap_or_default()
                } else {
                    String::new()
                },
                save_inline_cache: args.save_inline_cache,
                final_artifact_dest,
                secrets,
            },
            &handlers,
            None,
        )
        .await?;

    if let Some(checker) = &skip_checker {
        checker.record(&target, &overriding).await;
    }

    println!("Build of {} complete.", target.string());
    Ok(())
}

/// The `ls` verb: list the targets of a build file.
pub fn ls(reference: &str, long: bool) -> anyhow::Result<()> {
    let dir = if reference.is_empty() || reference == "." {
        PathBuf::from(".")
    } else {
        PathBuf::from(reference)
    };
    let build_file = find_build_file(&dir)
        .with_context(|| format!("no build file found in {}", dir.display()))?;
    let earthfile = eb_ast::parse_file(&build_file).map_err(|e| anyhow::anyhow!("{e}"))?;

    for target in &earthfile.targets {
        if long {
            let args = target_args(&target.recipe);
            let docs = target.docs.lines().next().unwrap_or_default();
            let mut line = format!("+{}", target.name);
            for arg in args {
                line.push_str(&format!(" --{arg}"));
            }
            if !docs.is_empty() {
                line.push_str(&format!("    # {docs}"));
            }
            println!("{line}");
        } else {
            println!("+{}", target.name);
        }
    }
    Ok(())
}

/// The `bootstrap` verb: prepare the installation directory.
pub fn bootstrap() -> anyhow::Result<()> {
    let dir = config::get_or_create_installation_dir()?;
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        config::save_config(&config::InstallationConfig::default())?;
    }
    SkipDb::open(&config::skip_db_path())?;
    println!("Bootstrapped {}.", dir.display());
    Ok(())
}

/// Render the single user-facing error line, with hints when present.
pub fn format_user_error(err: &anyhow::Error) -> String {
    let text = format!("{err:#}");
    if let Some(hint) = HintError::from_error_text(&text) {
        let hints: String = hint
            .hint()
            .lines()
            .map(|line| format!("  Hint: {line}\n"))
            .collect();
        return format!("{}\n{}", hint.message(), hints.trim_end());
    }
    text
}

fn build_arg_scope(
    args: &BuildArgs,
    cwd: &Path,
    env_overlay: &BTreeMap<String, String>,
) -> anyhow::Result<Scope> {
    let mut scope = Scope::new();
    let from_file = envfile::load_env_file(&cwd.join(&args.arg_file))?;
    for (k, v) in from_file {
        scope.add_active(k, v);
    }
    for entry in &args.build_args {
        match entry.split_once('=') {
            Some((k, v)) => {
                scope.add_active(k, v);
            }
            None => {
                if let Some(v) = lookup_env(entry, env_overlay) {
                    scope.add_active(entry.as_str(), v);
                }
            }
        }
    }
    Ok(scope)
}

fn secret_map(
    args: &BuildArgs,
    cwd: &Path,
    env_overlay: &BTreeMap<String, String>,
) -> anyhow::Result<BTreeMap<String, String>> {
    let mut secrets = envfile::load_env_file(&cwd.join(&args.secret_file))?;
    for entry in &args.secrets {
        match entry.split_once('=') {
            Some((k, v)) => {
                secrets.insert(k.to_string(), v.to_string());
            }
            None => {
                if let Some(v) = lookup_env(entry, env_overlay) {
                    secrets.insert(entry.clone(), v);
                }
            }
        }
    }
    for entry in &args.secret_files {
        let (name, path) = entry
            .split_once('=')
            .with_context(|| format!("--secret-file expects K=path, got {entry:?}"))?;
        let value = std::fs::read_to_string(cwd.join(path))
            .with_context(|| format!("reading secret file {path}"))?;
        secrets.insert(name.to_string(), value);
    }
    Ok(secrets)
}

fn lookup_env(name: &str, overlay: &BTreeMap<String, String>) -> Option<String> {
    std::env::var(name)
        .ok()
        .or_else(|| overlay.get(name).cloned())
}

fn find_build_file(dir: &Path) -> Option<PathBuf> {
    [eb_context::BUILD_FILE_NAME, eb_context::LEGACY_BUILD_FILE_NAME]
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn target_args(recipe: &[eb_ast::spec::Statement]) -> Vec<String> {
    let mut out = Vec::new();
    for statement in recipe {
        if let eb_ast::spec::Statement::Command(cmd) = statement
            && cmd.name == "ARG"
            && let Some(name) = cmd.args.iter().find(|a| !a.starts_with('-'))
        {
            out.push(name.clone());
        }
    }
    out
}
