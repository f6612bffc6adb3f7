// SPDX-License-Identifier: MIT OR Apache-2.0
//! The recursive target loader behind [`hash_target`](crate::hash_target).

use crate::hasher::Hasher;
use eb_ast::spec::{Block, Command, Earthfile, Statement};
use eb_context::{BUILD_FILE_NAME, ExcludeMatcher, LEGACY_BUILD_FILE_NAME, read_excludes};
use eb_domain::{GitMetadata, Target, join_references, normalize_path};
use eb_features::Features;
use eb_flag::parse_arg_args;
use eb_platform::{Platform, PlatformResolver};
use eb_vars::{DefaultArgs, ExpandSegment, Scope, builtin_args, parse_expansion, reserved};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Errors from input-graph hashing.
#[derive(Debug, Error)]
pub enum InputGraphError {
    /// The remote-target form cannot be hashed soundly.
    #[error("remote target {0} is not supported for auto-skip")]
    UnsupportedRemote(String),
    /// A dynamic construct makes the fingerprint unsound.
    #[error("{0} is not supported for auto-skip")]
    Unsupported(String),
    /// The build file failed to parse.
    #[error("{0}")]
    Parse(String),
    /// A referenced target does not exist.
    #[error("target {0} not found")]
    TargetNotFound(String),
    /// Filesystem access failed.
    #[error("io error on {path}: {reason}")]
    Io {
        /// The offending path.
        path: String,
        /// The IO error text.
        reason: String,
    },
    /// A reference failed to parse or join.
    #[error("{0}")]
    Reference(String),
}

/// Counters for cache effectiveness, exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of targets hashed from scratch.
    pub targets_hashed: usize,
    /// Number of sub-target visits served from the cache.
    pub target_cache_hits: usize,
}

/// Options for [`hash_target`].
#[derive(Debug, Clone, Default)]
pub struct HashOpt {
    /// The target to fingerprint.
    pub target: Target,
    /// Anchor for relative local references (usually the cwd).
    pub local_root: PathBuf,
    /// Overriding build args from the command line.
    pub overriding: Scope,
    /// Builtin ARG values provided by the binary.
    pub builtin_args: DefaultArgs,
    /// Whether this is a CI run.
    pub ci: bool,
    /// Whether push mode is enabled.
    pub push: bool,
}

/// Produce the fingerprint of a target.
///
/// Remote targets are not recursed into: a supported (pinned) form hashes
/// as its canonical string; anything else is an error.
pub async fn hash_target(opt: HashOpt) -> Result<(Vec<u8>, Stats), InputGraphError> {
    if opt.target.is_remote() {
        if !supported_remote_target(&opt.target) {
            return Err(InputGraphError::UnsupportedRemote(opt.target.string()));
        }
        let mut hasher = Hasher::new();
        hasher.hash_string(&opt.target.string_canonical());
        return Ok((hasher.finish(), Stats::default()));
    }

    let git_meta = eb_context::detect_git_metadata(&opt.local_root).await;
    let mut loader = Loader {
        local_root: opt.local_root.clone(),
        overriding: opt.overriding.clone(),
        builtin_defaults: opt.builtin_args.clone(),
        git_meta,
        ci: opt.ci,
        push: opt.push,
        cache: HashMap::new(),
        stats: Stats::default(),
    };
    let digest = loader.load_target(&opt.target, &opt.overriding)?;
    debug!(
        target: "eb.inputgraph",
        target = %opt.target.string_canonical(),
        hash = %hex::encode(&digest),
        hashed = loader.stats.targets_hashed,
        cache_hits = loader.stats.target_cache_hits,
        "hashed target"
    );
    Ok((digest, loader.stats))
}

/// Whether a remote-target form can be hashed at all.
///
/// Only pinned refs qualify; a floating ref could change under the
/// fingerprint and produce a false skip.
#[must_use]
pub fn supported_remote_target(target: &Target) -> bool {
    target.is_remote() && !target.tag.is_empty()
}

struct Loader {
    local_root: PathBuf,
    overriding: Scope,
    builtin_defaults: DefaultArgs,
    git_meta: Option<GitMetadata>,
    ci: bool,
    push: bool,
    cache: HashMap<(String, String), Vec<u8>>,
    stats: Stats,
}

/// Per-target hashing context.
struct TargetCtx {
    target: Target,
    dir: PathBuf,
    earthfile: Earthfile,
    ftrs: Features,
    matcher: ExcludeMatcher,
    vars: HashMap<String, String>,
    builtin: Scope,
    overriding: Scope,
}

impl Loader {
    fn load_target(
        &mut self,
        target: &Target,
        overriding: &Scope,
    ) -> Result<Vec<u8>, InputGraphError> {
        if target.is_remote() {
            if !supported_remote_target(target) {
                return Err(InputGraphError::UnsupportedRemote(target.string()));
            }
            let mut hasher = Hasher::new();
            hasher.hash_string(&target.string_canonical());
            return Ok(hasher.finish());
        }

        let dir = self.target_dir(target);
        let key = (dir.display().to_string(), target.target.clone());
        if let Some(cached) = self.cache.get(&key) {
            self.stats.target_cache_hits += 1;
            return Ok(cached.clone());
        }
        self.stats.targets_hashed += 1;

        let mut ctx = self.open_target(target, &dir, overriding)?;
        let mut hasher = Hasher::new();
        hasher.hash_string(&target.string_canonical());
        hasher.hash_string(&Platform::host().to_string());
        if let Some(version) = &ctx.earthfile.version {
            for arg in &version.args {
                hasher.hash_string(arg);
            }
        }

        let base = ctx.earthfile.base_recipe.clone();
        self.hash_block(&mut ctx, &base, &mut hasher)?;
        if ctx.target.target != "base" {
            let recipe = ctx
                .earthfile
                .target(&ctx.target.target)
                .ok_or_else(|| InputGraphError::TargetNotFound(target.string()))?
                .recipe
                .clone();
            self.hash_block(&mut ctx, &recipe, &mut hasher)?;
        }

        let digest = hasher.finish();
        self.cache.insert(key, digest.clone());
        Ok(digest)
    }

    fn target_dir(&self, target: &Target) -> PathBuf {
        let rel = if target.local_path.is_empty() {
            "."
        } else {
            target.local_path.as_str()
        };
        let mut out = self.local_root.clone();
        if rel.starts_with('/') {
            return PathBuf::from(rel);
        }
        for seg in rel.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    out.pop();
                }
                other => out.push(other),
            }
        }
        out
    }

    fn open_target(
        &self,
        target: &Target,
        dir: &Path,
        overriding: &Scope,
    ) -> Result<TargetCtx, InputGraphError> {
        let build_file = [BUILD_FILE_NAME, LEGACY_BUILD_FILE_NAME]
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists())
            .ok_or_else(|| InputGraphError::Io {
                path: dir.display().to_string(),
                reason: "no build file".to_string(),
            })?;
        let earthfile =
            eb_ast::parse_file(&build_file).map_err(|e| InputGraphError::Parse(e.to_string()))?;

        let version_args = earthfile.version.as_ref().map(|v| v.args.as_slice());
        let (mut ftrs, _) =
            Features::get(version_args).map_err(|e| InputGraphError::Parse(e.to_string()))?;
        ftrs.process_flags()
            .map_err(|e| InputGraphError::Parse(e.to_string()))?;

        let excludes = read_excludes(dir, ftrs.no_implicit_ignore, ftrs.use_docker_ignore)
            .map_err(|e| InputGraphError::Io {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        let matcher = ExcludeMatcher::new(&excludes).map_err(|e| InputGraphError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let platr = PlatformResolver::new(Platform::host(), Platform::host());
        let builtin = builtin_args(
            target,
            &platr,
            self.git_meta.as_ref(),
            &self.builtin_defaults,
            &ftrs,
            self.push,
            self.ci,
        );

        Ok(TargetCtx {
            target: target.clone(),
            dir: dir.to_path_buf(),
            earthfile,
            ftrs,
            matcher,
            vars: HashMap::new(),
            builtin,
            overriding: overriding.clone(),
        })
    }

    // -- recipe walking --------------------------------------------------

    fn hash_block(
        &mut self,
        ctx: &mut TargetCtx,
        block: &Block,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        for statement in block {
            match statement {
                Statement::Command(cmd) => self.hash_command(ctx, cmd, hasher)?,
                Statement::If(stmt) => {
                    hasher.hash_string("IF");
                    self.hash_tokens(ctx, &stmt.expression, hasher)?;
                    self.hash_block(ctx, &stmt.if_body, hasher)?;
                    for arm in &stmt.else_if {
                        hasher.hash_string("ELSE IF");
                        self.hash_tokens(ctx, &arm.expression, hasher)?;
                        self.hash_block(ctx, &arm.body.clone(), hasher)?;
                    }
                    if let Some(else_body) = &stmt.else_body {
                        hasher.hash_string("ELSE");
                        self.hash_block(ctx, &else_body.clone(), hasher)?;
                    }
                }
                Statement::For(stmt) => {
                    hasher.hash_string("FOR");
                    self.hash_tokens(ctx, &stmt.args, hasher)?;
                    // The loop variable's runtime values are not knowable
                    // here; the body is hashed once with it empty.
                    if let Some(variable) = stmt.args.first() {
                        ctx.vars.insert(variable.clone(), String::new());
                    }
                    self.hash_block(ctx, &stmt.body.clone(), hasher)?;
                }
                Statement::Try(stmt) => {
                    hasher.hash_string("TRY");
                    self.hash_block(ctx, &stmt.try_body.clone(), hasher)?;
                    if let Some(catch_body) = &stmt.catch_body {
                        hasher.hash_string("CATCH");
                        self.hash_block(ctx, &catch_body.clone(), hasher)?;
                    }
                    if let Some(finally_body) = &stmt.finally_body {
                        hasher.hash_string("FINALLY");
                        self.hash_block(ctx, &finally_body.clone(), hasher)?;
                    }
                }
                Statement::Wait(stmt) => {
                    hasher.hash_string("WAIT");
                    self.hash_block(ctx, &stmt.body.clone(), hasher)?;
                }
                Statement::With(stmt) => {
                    hasher.hash_string("WITH");
                    self.hash_command(ctx, &stmt.command, hasher)?;
                    self.hash_block(ctx, &stmt.body.clone(), hasher)?;
                }
            }
        }
        Ok(())
    }

    fn hash_command(
        &mut self,
        ctx: &mut TargetCtx,
        cmd: &Command,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        hasher.hash_string(&cmd.name);
        let args = self.expand_tokens(ctx, &cmd.args)?;

        // Flags in flag-name-sorted order, positionals in source order;
        // every value is length-prefixed by the hasher.
        let mut flags: Vec<&String> = Vec::new();
        let mut positional: Vec<&String> = Vec::new();
        let mut flags_done = false;
        for arg in &args {
            if !flags_done && arg.starts_with("--") {
                flags.push(arg);
            } else {
                flags_done = true;
                positional.push(arg);
            }
        }
        flags.sort();
        for flag in flags {
            hasher.hash_string(flag);
        }
        for arg in &positional {
            hasher.hash_string(arg);
        }

        match cmd.name.as_str() {
            "ARG" => self.hash_arg(ctx, cmd, hasher)?,
            "LET" | "SET" | "ENV" => {
                if let [name, eq, value] = args.as_slice()
                    && eq == "="
                {
                    ctx.vars.insert(name.clone(), value.clone());
                }
            }
            "FROM" | "BUILD" => {
                if let Some(reference) = positional.first()
                    && reference.contains('+')
                {
                    self.hash_reference(ctx, reference, &args, hasher)?;
                }
            }
            "COPY" | "ADD" => {
                if positional.len() >= 2 {
                    for src in &positional[..positional.len() - 1] {
                        if src.contains('+') {
                            self.hash_reference(ctx, src, &args, hasher)?;
                        } else {
                            self.hash_path(ctx, src, hasher)?;
                        }
                    }
                }
            }
            "FROM DOCKERFILE" => {
                if let Some(context_path) = positional.first() {
                    self.hash_path(ctx, context_path, hasher)?;
                }
            }
            "DO" => {
                if let Some(reference) = positional.first() {
                    self.hash_function(ctx, reference, hasher)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn hash_arg(
        &mut self,
        ctx: &mut TargetCtx,
        cmd: &Command,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        let (_opts, name, default) = parse_arg_args(
            &cmd.args,
            false, // scoping is irrelevant for hashing
            true,
        )
        .map_err(|e| InputGraphError::Parse(e.to_string()))?;

        let default = match default {
            Some(raw) => Some(self.expand_token(ctx, &raw)?),
            None => None,
        };
        let value = ctx
            .overriding
            .get_active(&name)
            .map(String::from)
            .or_else(|| {
                if reserved::is_builtin(&name) {
                    ctx.builtin.get_active(&name).map(String::from)
                } else {
                    None
                }
            })
            .or(default)
            .unwrap_or_default();

        // The resolved value is an input: a changed override or builtin
        // (e.g. EARTHLY_GIT_HASH) changes the fingerprint.
        hasher.hash_string(&name);
        hasher.hash_string(&value);
        ctx.vars.insert(name, value);
        Ok(())
    }

    fn hash_reference(
        &mut self,
        ctx: &mut TargetCtx,
        reference: &str,
        command_args: &[String],
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        // Strip an artifact path: `+t/out/bin` hashes target `+t`.
        let target_part = match reference.rfind('+') {
            Some(plus) => match reference[plus..].find('/') {
                Some(slash) => &reference[..plus + slash],
                None => reference,
            },
            None => reference,
        };
        let parsed = Target::parse(target_part)
            .map_err(|e| InputGraphError::Reference(e.to_string()))?;
        let joined = join_references(&ctx.target, &parsed)
            .map_err(|e| InputGraphError::Reference(e.to_string()))?;

        let mut child_overriding = Scope::new();
        let mut next_is_value = false;
        for arg in command_args {
            if next_is_value {
                next_is_value = false;
                if let Some((k, v)) = arg.split_once('=') {
                    child_overriding.add_active(k, v);
                }
                continue;
            }
            if arg == "--build-arg" {
                next_is_value = true;
            } else if let Some(value) = arg.strip_prefix("--build-arg=")
                && let Some((k, v)) = value.split_once('=')
            {
                child_overriding.add_active(k, v);
            }
        }

        let digest = self.load_target(&joined, &child_overriding)?;
        hasher.hash_bytes(&digest);
        Ok(())
    }

    fn hash_function(
        &mut self,
        ctx: &mut TargetCtx,
        reference: &str,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        let parsed = Target::parse(reference)
            .map_err(|e| InputGraphError::Reference(e.to_string()))?;
        if parsed.is_external() {
            let joined = join_references(&ctx.target, &parsed)
                .map_err(|e| InputGraphError::Reference(e.to_string()))?;
            if joined.is_remote() {
                if !supported_remote_target(&joined) {
                    return Err(InputGraphError::UnsupportedRemote(joined.string()));
                }
                hasher.hash_string(&joined.string_canonical());
                return Ok(());
            }
            // Hash the whole referenced file via its base target.
            let base = joined.with_target("base");
            let digest = self.load_target(&base, &Scope::new())?;
            hasher.hash_bytes(&digest);
            hasher.hash_string(&joined.target);
            return Ok(());
        }

        let function = ctx
            .earthfile
            .function(&parsed.target)
            .ok_or_else(|| InputGraphError::TargetNotFound(reference.to_string()))?;
        let recipe = function.recipe.clone();
        self.hash_block(ctx, &recipe, hasher)
    }

    // -- file hashing ----------------------------------------------------

    fn hash_path(
        &mut self,
        ctx: &TargetCtx,
        src: &str,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        if src.contains('*') || src.contains('?') {
            return self.hash_glob(ctx, src, hasher);
        }
        let rel = normalize_path(src);
        // COPY sources are context-relative even when written absolute.
        let path = ctx
            .dir
            .join(rel.trim_start_matches("./").trim_start_matches('/'));
        if path.is_file() {
            hasher
                .hash_file(&rel, &path)
                .map_err(|e| InputGraphError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(());
        }
        if path.is_dir() {
            return self.hash_dir(ctx, &path, hasher);
        }
        // The path may be produced dynamically at build time; record its
        // absence so appearance changes the fingerprint.
        hasher.hash_string(&format!("missing: {rel};"));
        Ok(())
    }

    fn hash_dir(
        &self,
        ctx: &TargetCtx,
        dir: &Path,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        let mut walker = WalkDir::new(dir).sort_by_file_name().into_iter();
        loop {
            let entry = match walker.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    return Err(InputGraphError::Io {
                        path: dir.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            let rel = entry
                .path()
                .strip_prefix(&ctx.dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if rel.is_empty() {
                continue;
            }
            if ctx.matcher.is_excluded_str(&rel) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_file() {
                hasher
                    .hash_file(&rel, entry.path())
                    .map_err(|e| InputGraphError::Io {
                        path: entry.path().display().to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    fn hash_glob(
        &self,
        ctx: &TargetCtx,
        pattern: &str,
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        hasher.hash_string(&format!("glob: {pattern};"));
        let glob = globlike(pattern);
        let mut walker = WalkDir::new(&ctx.dir).sort_by_file_name().into_iter();
        loop {
            let entry = match walker.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    return Err(InputGraphError::Io {
                        path: ctx.dir.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            let rel = entry
                .path()
                .strip_prefix(&ctx.dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if rel.is_empty() {
                continue;
            }
            if ctx.matcher.is_excluded_str(&rel) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }
            if entry.file_type().is_file() && glob.is_match(&rel) {
                hasher
                    .hash_file(&rel, entry.path())
                    .map_err(|e| InputGraphError::Io {
                        path: entry.path().display().to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    // -- expansion -------------------------------------------------------

    fn expand_tokens(
        &self,
        ctx: &TargetCtx,
        tokens: &[String],
    ) -> Result<Vec<String>, InputGraphError> {
        tokens
            .iter()
            .map(|token| self.expand_token(ctx, token))
            .collect()
    }

    fn hash_tokens(
        &self,
        ctx: &TargetCtx,
        tokens: &[String],
        hasher: &mut Hasher,
    ) -> Result<(), InputGraphError> {
        for token in self.expand_tokens(ctx, tokens)? {
            hasher.hash_string(&token);
        }
        Ok(())
    }

    fn expand_token(&self, ctx: &TargetCtx, token: &str) -> Result<String, InputGraphError> {
        let segments =
            parse_expansion(token).map_err(|e| InputGraphError::Parse(e.to_string()))?;
        let mut out = String::with_capacity(token.len());
        for segment in segments {
            match segment {
                ExpandSegment::Literal(s) => out.push_str(&s),
                ExpandSegment::Var(name) => {
                    if let Some(v) = ctx.vars.get(&name) {
                        out.push_str(v);
                    }
                }
                ExpandSegment::Shell(cmd) => {
                    return Err(InputGraphError::Unsupported(format!("shell-out $({cmd})")));
                }
            }
        }
        Ok(out)
    }
}

fn globlike(pattern: &str) -> globset::GlobMatcher {
    globset::Glob::new(pattern)
        .unwrap_or_else(|_| globset::Glob::new("**").expect("fallback glob compiles"))
        .compile_matcher()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, contents).expect("write");
    }

    fn opt(dir: &Path, target: &str) -> HashOpt {
        HashOpt {
            target: Target::parse(target).expect("target"),
            local_root: dir.to_path_buf(),
            ..HashOpt::default()
        }
    }

    #[tokio::test]
    async fn hashing_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    COPY src/app.txt /app\n",
        );
        write(dir.path(), "src/app.txt", "hello");

        let (first, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        let (second, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_eq!(hex::encode(first), hex::encode(second));
    }

    #[tokio::test]
    async fn changing_a_copied_file_changes_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    COPY src/app.txt /app\n",
        );
        write(dir.path(), "src/app.txt", "hello");

        let (before, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        write(dir.path(), "src/app.txt", "hellO");
        let (after, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_ne!(hex::encode(before), hex::encode(after));
    }

    #[tokio::test]
    async fn changing_the_recipe_changes_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo a\n",
        );
        let (before, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    RUN echo b\n",
        );
        let (after, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_ne!(hex::encode(before), hex::encode(after));
    }

    #[tokio::test]
    async fn ignored_files_do_not_affect_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), ".earthignore", "src/scratch/\n");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    COPY src /all\n",
        );
        write(dir.path(), "src/app.txt", "hello");
        write(dir.path(), "src/scratch/tmp.txt", "one");

        let (before, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        write(dir.path(), "src/scratch/tmp.txt", "two");
        let (after, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_eq!(hex::encode(before), hex::encode(after));
    }

    #[tokio::test]
    async fn overriding_args_change_the_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    ARG tag=dev\n    RUN echo $tag\n",
        );
        let (default_hash, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");

        let mut with_args = opt(dir.path(), "+build");
        with_args.overriding.add_active("tag", "release");
        let (overridden, _) = hash_target(with_args).await.expect("hash");
        assert_ne!(hex::encode(default_hash), hex::encode(overridden));
    }

    #[tokio::test]
    async fn referenced_targets_are_hashed_recursively() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\n\
             dep:\n    FROM alpine:3.18\n    COPY lib.txt /lib\n\n\
             build:\n    FROM +dep\n    RUN make\n",
        );
        write(dir.path(), "lib.txt", "v1");

        let (before, stats) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_eq!(stats.targets_hashed, 2);

        write(dir.path(), "lib.txt", "v2");
        let (after, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_ne!(
            hex::encode(before),
            hex::encode(after),
            "dependency file change propagates"
        );
    }

    #[tokio::test]
    async fn repeated_references_hit_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\n\
             dep:\n    FROM alpine:3.18\n\n\
             a:\n    FROM +dep\n\n\
             b:\n    FROM +dep\n\n\
             build:\n    BUILD +a\n    BUILD +b\n    BUILD +a\n",
        );

        let (_, stats) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        // build, a, b, dep hashed once each; dep referenced again by b and
        // a referenced once more.
        assert_eq!(stats.targets_hashed, 4);
        assert_eq!(stats.target_cache_hits, 2);
    }

    #[tokio::test]
    async fn pinned_remote_targets_hash_as_their_canonical_ref() {
        let (hash, stats) = hash_target(HashOpt {
            target: Target::parse("github.com/foo/bar:v1.2.3+build").expect("target"),
            ..HashOpt::default()
        })
        .await
        .expect("hash");
        assert!(!hash.is_empty());
        assert_eq!(stats, Stats::default());
    }

    #[tokio::test]
    async fn floating_remote_targets_are_rejected() {
        let err = hash_target(HashOpt {
            target: Target::parse("github.com/foo/bar+build").expect("target"),
            ..HashOpt::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, InputGraphError::UnsupportedRemote(_)));
    }

    #[tokio::test]
    async fn shell_outs_make_hashing_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    ARG v=$(cat version)\n",
        );
        let err = hash_target(opt(dir.path(), "+build")).await.unwrap_err();
        assert!(matches!(err, InputGraphError::Unsupported(_)));
    }

    #[tokio::test]
    async fn branch_coverage_includes_both_if_arms() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    IF test -f x\n        RUN echo a\n    ELSE\n        RUN echo b\n    END\n",
        );
        let (before, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");

        write(
            dir.path(),
            "Earthfile",
            "VERSION 0.7\n\nbuild:\n    FROM alpine:3.18\n    IF test -f x\n        RUN echo a\n    ELSE\n        RUN echo c\n    END\n",
        );
        let (after, _) = hash_target(opt(dir.path(), "+build")).await.expect("hash");
        assert_ne!(
            hex::encode(before),
            hex::encode(after),
            "the untaken branch is still an input"
        );
    }
}
