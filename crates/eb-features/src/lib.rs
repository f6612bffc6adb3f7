// SPDX-License-Identifier: MIT OR Apache-2.0
//! Feature flags gated by the `VERSION` declaration of a build file.
//!
//! Each flag has a long name and, for released flags, the version at which it
//! becomes enabled by default. [`Features::get`] parses a `VERSION` argument
//! list, [`Features::process_flags`] applies version-based enablement and
//! checks cross-flag constraints, and [`apply_flag_overrides`] applies a
//! comma-separated override string (typically from the environment).
//!
//! The flag set is a static table; adding a flag means adding a field and one
//! table row.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;
use thiserror::Error;

/// Errors produced while resolving features from a `VERSION` declaration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeaturesError {
    /// The `VERSION` arguments are not `[flags] <major>.<minor>`.
    #[error("unexpected VERSION arguments; should be VERSION [flags] <major-version>.<minor-version>")]
    UnexpectedArgs,
    /// A flag name is not in the flag table.
    #[error("unable to set {0}: invalid flag")]
    InvalidFlag(String),
    /// The flag exists but does not accept a value.
    #[error("flag --{0} does not take a value")]
    UnexpectedValue(String),
    /// The major or minor version component failed to parse.
    #[error("failed to parse version component {0:?}")]
    BadVersion(String),
    /// `arg-scope-and-set` requires `shell-out-anywhere`.
    #[error("--arg-scope-and-set requires --shell-out-anywhere")]
    ArgScopeSetRequiresShellOut,
}

/// Which features are enabled for a build file.
///
/// This is used to maintain backwards compatibility: an old build file keeps
/// its old behavior even when built by a newer binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    // Never enabled by default.
    /// Escape hatch disabling the embedded registry for WITH DOCKER.
    pub no_use_registry_for_with_docker: bool,
    /// Includes the `EARTHLY_CI_RUNNER` builtin ARG.
    pub ci_runner_arg: bool,

    // VERSION 0.5
    /// Force execution after parallel conversion.
    pub exec_after_parallel: bool,
    /// Perform parallel loading of images into WITH DOCKER.
    pub parallel_load: bool,
    /// Use the embedded registry for WITH DOCKER load operations.
    pub use_registry_for_with_docker: bool,

    // VERSION 0.6
    /// Allow the `FOR` command.
    pub for_in: bool,
    /// Disable the implicit ignore rules when resolving local context.
    pub no_implicit_ignore: bool,
    /// Only save artifacts that are directly referenced.
    pub referenced_save_only: bool,
    /// Require `--force` when saving to a path outside the current path.
    pub require_force_for_unsafe_saves: bool,
    /// Pass include patterns to the engine when performing copies.
    pub use_copy_include_patterns: bool,

    // VERSION 0.7
    /// Check for duplicate images during output.
    pub check_duplicate_images: bool,
    /// Include the `EARTHLY_CI` builtin ARG.
    pub ci_arg: bool,
    /// Include the `EARTHLY_GIT_AUTHOR` and `EARTHLY_GIT_CO_AUTHORS` ARGs.
    pub git_author_args: bool,
    /// Include the `EARTHLY_LOCALLY` builtin ARG.
    pub locally_arg: bool,
    /// Include the `EARTHLY_VERSION` and `EARTHLY_BUILD_SHA` ARGs.
    pub version_arg: bool,
    /// Require base-recipe args to use `--global` to be considered global.
    pub explicit_global: bool,
    /// Include the `EARTHLY_GIT_COMMIT_AUTHOR_TIMESTAMP` ARG.
    pub git_commit_author_timestamp: bool,
    /// Enable the newer platform propagation behavior.
    pub new_platform: bool,
    /// Do not print output when creating a WITH DOCKER tarball.
    pub no_tar_build_output: bool,
    /// Always apply `--keep-own` with SAVE ARTIFACT.
    pub save_artifact_keep_own: bool,
    /// Allow `$(...)` shell-outs in ARGs and any other command.
    pub shell_out_anywhere: bool,
    /// Allow the `CACHE` command.
    pub use_cache_command: bool,
    /// Enable the `COPY --chmod` option.
    pub use_chmod: bool,
    /// Emit the engine's link flag for all copy-like operations.
    pub use_copy_link: bool,
    /// Allow the `HOST` command.
    pub use_host_command: bool,
    /// Enable the `SAVE IMAGE --no-manifest-list` option.
    pub use_no_manifest_list: bool,
    /// Enable project-based secret resolution.
    pub use_project_secrets: bool,
    /// Enable WAIT/END, and allow mixed push/non-push in the same target.
    pub wait_block: bool,

    // VERSION 0.8
    /// Allow `RUN --network=none`.
    pub no_network: bool,
    /// Enable `SET`, and prevent ARG redeclaration in the same scope.
    pub arg_scope_set: bool,
    /// Fall back to `.dockerignore` when no earthbuild ignore file exists.
    pub use_docker_ignore: bool,
    /// Allow `--pass-args` on FROM, BUILD, COPY, WITH DOCKER, and DO.
    pub pass_args: bool,
    /// Enable caches shared across different build files.
    pub global_cache: bool,
    /// Add the CACHE `--persist` option and flip the default to not persist.
    pub cache_persist_option: bool,
    /// Include the `EARTHLY_GIT_REFS` builtin ARG.
    pub git_refs: bool,
    /// Key visited targets by an upfront input-graph hash.
    pub use_visited_upfront_hash_collection: bool,
    /// Accept the `FUNCTION` keyword in place of `COMMAND`.
    pub use_function_keyword: bool,

    // Unreleased.
    /// Allow TRY/CATCH/FINALLY.
    pub try_finally: bool,
    /// Allow wildcard expansion in BUILD target paths.
    pub wildcard_builds: bool,
    /// Allow `--auto-skip` on individual BUILD commands.
    pub build_auto_skip: bool,
    /// Make host AWS credentials available to RUN commands.
    pub run_with_aws: bool,
    /// Allow `RUN --raw-output`.
    pub raw_output: bool,
    /// Include the `EARTHLY_GIT_AUTHOR_EMAIL`/`_NAME` builtin ARGs.
    pub git_author_email_name_args: bool,
    /// Allow `SAVE IMAGE --without-earthly-labels`.
    pub allow_without_earthly_labels: bool,
    /// Allow wildcard expansion in COPY sources.
    pub wildcard_copy: bool,
    /// Make AWS credentials via an OIDC provider available to RUN commands.
    pub run_with_aws_oidc: bool,

    /// Major version from the `VERSION` declaration.
    pub major: u32,
    /// Minor version from the `VERSION` declaration.
    pub minor: u32,
}

/// One row of the static flag table.
struct FlagSpec {
    long: &'static str,
    enabled_in_version: Option<(u32, u32)>,
    get: fn(&Features) -> bool,
    set: fn(&mut Features),
}

macro_rules! flag {
    ($long:literal, $field:ident) => {
        FlagSpec {
            long: $long,
            enabled_in_version: None,
            get: |f| f.$field,
            set: |f| f.$field = true,
        }
    };
    ($long:literal, $field:ident, $maj:literal, $min:literal) => {
        FlagSpec {
            long: $long,
            enabled_in_version: Some(($maj, $min)),
            get: |f| f.$field,
            set: |f| f.$field = true,
        }
    };
}

static FLAG_TABLE: &[FlagSpec] = &[
    flag!("no-use-registry-for-with-docker", no_use_registry_for_with_docker),
    flag!("ci-runner-arg", ci_runner_arg),
    flag!("exec-after-parallel", exec_after_parallel, 0, 5),
    flag!("parallel-load", parallel_load, 0, 5),
    flag!("use-registry-for-with-docker", use_registry_for_with_docker, 0, 5),
    flag!("for-in", for_in, 0, 6),
    flag!("no-implicit-ignore", no_implicit_ignore, 0, 6),
    flag!("referenced-save-only", referenced_save_only, 0, 6),
    flag!("require-force-for-unsafe-saves", require_force_for_unsafe_saves, 0, 6),
    flag!("use-copy-include-patterns", use_copy_include_patterns, 0, 6),
    flag!("check-duplicate-images", check_duplicate_images, 0, 7),
    flag!("ci-arg", ci_arg, 0, 7),
    flag!("git-author-args", git_author_args, 0, 7),
    flag!("locally-arg", locally_arg, 0, 7),
    flag!("version-arg", version_arg, 0, 7),
    flag!("explicit-global", explicit_global, 0, 7),
    flag!("git-commit-author-timestamp", git_commit_author_timestamp, 0, 7),
    flag!("new-platform", new_platform, 0, 7),
    flag!("no-tar-build-output", no_tar_build_output, 0, 7),
    flag!("save-artifact-keep-own", save_artifact_keep_own, 0, 7),
    flag!("shell-out-anywhere", shell_out_anywhere, 0, 7),
    flag!("use-cache-command", use_cache_command, 0, 7),
    flag!("use-chmod", use_chmod, 0, 7),
    flag!("use-copy-link", use_copy_link, 0, 7),
    flag!("use-host-command", use_host_command, 0, 7),
    flag!("use-no-manifest-list", use_no_manifest_list, 0, 7),
    flag!("use-project-secrets", use_project_secrets, 0, 7),
    flag!("wait-block", wait_block, 0, 7),
    flag!("no-network", no_network, 0, 8),
    flag!("arg-scope-and-set", arg_scope_set, 0, 8),
    flag!("use-docker-ignore", use_docker_ignore, 0, 8),
    flag!("pass-args", pass_args, 0, 8),
    flag!("global-cache", global_cache, 0, 8),
    flag!("cache-persist-option", cache_persist_option, 0, 8),
    flag!("git-refs", git_refs, 0, 8),
    flag!("use-visited-upfront-hash-collection", use_visited_upfront_hash_collection, 0, 8),
    flag!("use-function-keyword", use_function_keyword, 0, 8),
    flag!("try", try_finally),
    flag!("wildcard-builds", wildcard_builds),
    flag!("build-auto-skip", build_auto_skip),
    flag!("run-with-aws", run_with_aws),
    flag!("raw-output", raw_output),
    flag!("git-author-email-name-args", git_author_email_name_args),
    flag!("allow-without-earthly-labels", allow_without_earthly_labels),
    flag!("wildcard-copy", wildcard_copy),
    flag!("run-with-aws-oidc", run_with_aws_oidc),
];

fn lookup(long: &str) -> Option<&'static FlagSpec> {
    FLAG_TABLE.iter().find(|spec| spec.long == long)
}

impl Features {
    /// Resolve a features record from the `VERSION` argument list.
    ///
    /// `args` is the raw argument list after the `VERSION` keyword, e.g.
    /// `["--shell-out-anywhere", "0.7"]`. A `None` version list means the
    /// build file has no `VERSION` header; the features default to `0.5`.
    ///
    /// The second return value reports whether an explicit version was given.
    pub fn get(args: Option<&[String]>) -> Result<(Self, bool), FeaturesError> {
        let has_version = args.is_some();
        let default_args = vec!["0.5".to_string()];
        let args = args.unwrap_or(&default_args);

        let mut ftrs = Features::default();
        let mut positional = Vec::new();
        for arg in args {
            if let Some(name) = arg.strip_prefix("--") {
                if let Some((name, _value)) = name.split_once('=') {
                    // VERSION flags are plain booleans.
                    if lookup(name).is_none() {
                        return Err(FeaturesError::InvalidFlag(name.to_string()));
                    }
                    return Err(FeaturesError::UnexpectedValue(name.to_string()));
                }
                let spec =
                    lookup(name).ok_or_else(|| FeaturesError::InvalidFlag(name.to_string()))?;
                (spec.set)(&mut ftrs);
            } else {
                positional.push(arg.as_str());
            }
        }

        if positional.len() != 1 {
            return Err(FeaturesError::UnexpectedArgs);
        }

        let (major, minor) = positional[0]
            .split_once('.')
            .ok_or(FeaturesError::UnexpectedArgs)?;
        ftrs.major = major
            .parse()
            .map_err(|_| FeaturesError::BadVersion(major.to_string()))?;
        ftrs.minor = minor
            .parse()
            .map_err(|_| FeaturesError::BadVersion(minor.to_string()))?;

        Ok((ftrs, has_version))
    }

    /// The declared version as `major.minor`.
    #[must_use]
    pub fn version(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// Whether the declared version is at least `major.minor`.
    #[must_use]
    pub fn version_at_least(&self, major: u32, minor: u32) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }

    /// Apply version-based enablement and validate cross-flag constraints.
    ///
    /// Every flag whose enablement version is at or below the declared
    /// version is turned on. Returns the long names of flags that were
    /// explicitly set even though the version already enables them, so the
    /// caller can warn about the redundancy.
    pub fn process_flags(&mut self) -> Result<Vec<String>, FeaturesError> {
        let mut warnings = Vec::new();

        for spec in FLAG_TABLE {
            let Some((major, minor)) = spec.enabled_in_version else {
                continue;
            };
            if self.version_at_least(major, minor) {
                if (spec.get)(self) {
                    warnings.push(format!("--{}", spec.long));
                }
                (spec.set)(self);
            }
        }

        self.process_negative_flags();

        if self.arg_scope_set && !self.shell_out_anywhere {
            // ArgScopeSet uses ARG declaration logic that requires
            // ShellOutAnywhere. Error early so users get feedback up front.
            return Err(FeaturesError::ArgScopeSetRequiresShellOut);
        }

        Ok(warnings)
    }

    fn process_negative_flags(&mut self) {
        if self.no_use_registry_for_with_docker {
            self.use_registry_for_with_docker = false;
        }
    }
}

impl fmt::Display for Features {
    /// Renders the canonical `VERSION` line: sorted set flags, then the
    /// version.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags: Vec<String> = FLAG_TABLE
            .iter()
            .filter(|spec| (spec.get)(self))
            .map(|spec| format!("--{}", spec.long))
            .collect();
        flags.sort();

        write!(f, "VERSION")?;
        if !flags.is_empty() {
            write!(f, " {}", flags.join(" "))?;
        }
        write!(f, " {}.{}", self.major, self.minor)
    }
}

/// Parse a comma-separated override string (`"a,b=c"`) into flag overrides
/// and set them. Names may carry a leading `--`; values are ignored (all
/// flags are boolean).
pub fn apply_flag_overrides(ftrs: &mut Features, overrides: &str) -> Result<(), FeaturesError> {
    for part in overrides.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let name = part.split('=').next().unwrap_or(part).trim();
        let name = name.strip_prefix("--").unwrap_or(name);
        let spec = lookup(name).ok_or_else(|| FeaturesError::InvalidFlag(name.to_string()))?;
        (spec.set)(ftrs);
    }

    ftrs.process_negative_flags();

    Ok(())
}
