// SPDX-License-Identifier: MIT OR Apache-2.0
//! The `earthbuild` command-line interface.

#![deny(unsafe_code)]

mod autocomplete;
mod commands;
mod config;
mod envfile;
mod offline;

use clap::{Args, Parser, Subcommand};
use eb_sync::CancelReason;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code for general failures.
const EXIT_FAILURE: u8 = 1;
/// Exit code for a forced exit (second interrupt, shutdown timeout).
const EXIT_FORCED: u8 = 9;
/// How long a graceful shutdown may take before forcing exit.
const SHUTDOWN_GRACE_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(
    name = "earthbuild",
    version,
    about = "Container-native build automation",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Default verb: build the given target.
    #[command(flatten)]
    build: BuildArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a target.
    Build(BuildArgs),
    /// List the targets of a build file.
    Ls(LsArgs),
    /// Set up the installation directory and configuration.
    Bootstrap,
}

#[derive(Args, Debug, Default, Clone)]
struct BuildArgs {
    /// Target reference to build, e.g. `+all` or `./services/api+build`.
    target: Option<String>,

    /// Enable push mode: deferred pushes run if the build succeeds.
    #[arg(long)]
    push: bool,

    /// Mark this as a CI run (sets `EARTHLY_CI`, implies strict).
    #[arg(long)]
    ci: bool,

    /// Ignore all caches.
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Do not materialize any local outputs.
    #[arg(long = "no-output")]
    no_output: bool,

    /// Materialize local outputs (the default; counters `--no-output`).
    #[arg(long)]
    output: bool,

    /// Build a single artifact: `--artifact +target/path [dest]`.
    #[arg(long)]
    artifact: Option<String>,

    /// Destination for `--artifact` output.
    #[arg(long = "artifact-dest", default_value = "./")]
    artifact_dest: String,

    /// Treat the target as an image build only.
    #[arg(long)]
    image: bool,

    /// Allow privileged operations.
    #[arg(long = "allow-privileged", short = 'P')]
    allow_privileged: bool,

    /// Disable implicit permissiveness (reserved for future checks).
    #[arg(long)]
    strict: bool,

    /// Registry ref to import/export build cache from/to.
    #[arg(long = "remote-cache")]
    remote_cache: Option<String>,

    /// Export the remote cache in max mode.
    #[arg(long = "max-remote-cache")]
    max_remote_cache: bool,

    /// Embed inline cache hints in pushed images.
    #[arg(long = "save-inline-cache")]
    save_inline_cache: bool,

    /// Use inline cache hints from pulled images.
    #[arg(long = "use-inline-cache")]
    use_inline_cache: bool,

    /// Skip targets whose input fingerprint is unchanged.
    #[arg(long = "auto-skip")]
    auto_skip: bool,

    /// Disable auto-skip even if enabled in the configuration.
    #[arg(long = "no-auto-skip")]
    no_auto_skip: bool,

    /// Platform to build for, e.g. `linux/arm64`.
    #[arg(long)]
    platform: Option<String>,

    /// Build arg override `K=V` (or `K` to pass the environment value).
    #[arg(long = "build-arg")]
    build_args: Vec<String>,

    /// Secret `K=V` (or `K` to pass the environment value).
    #[arg(long = "secret", short = 's')]
    secrets: Vec<String>,

    /// File containing a secret: `K=/path/to/file`.
    #[arg(long = "secret-file")]
    secret_files: Vec<String>,

    /// Environment file applied to the invocation.
    #[arg(long = "env-file-path", default_value = ".env")]
    env_file: String,

    /// Build-arg file applied to the invocation.
    #[arg(long = "arg-file-path", default_value = ".arg")]
    arg_file: String,

    /// Secret file applied to the invocation.
    #[arg(long = "secret-file-path", default_value = ".secret")]
    secret_file: String,

    /// Comma-separated feature flag overrides.
    #[arg(long = "feature-flag-overrides", hide = true)]
    feature_flag_overrides: Option<String>,
}

#[derive(Args, Debug)]
struct LsArgs {
    /// Build-file reference to list, e.g. `.` or `./services/api`.
    #[arg(default_value = ".")]
    reference: String,

    /// Show target documentation and arguments.
    #[arg(long, short = 'l')]
    long: bool,
}

fn main() -> ExitCode {
    // Shell completion requests arrive via COMP_LINE before normal args.
    if let Ok(comp_line) = std::env::var("COMP_LINE") {
        for suggestion in autocomplete::suggestions(&comp_line) {
            println!("{suggestion}");
        }
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("EARTHBUILD_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let code = runtime.block_on(run(cli));
    ExitCode::from(code)
}

async fn run(cli: Cli) -> u8 {
    let cancel = eb_sync::CancelToken::new();
    spawn_interrupt_handler(cancel.clone());

    let result = match cli.command {
        Some(Commands::Build(args)) => commands::build(args, cancel).await,
        Some(Commands::Ls(args)) => commands::ls(&args.reference, args.long),
        Some(Commands::Bootstrap) => commands::bootstrap(),
        None => commands::build(cli.build, cancel).await,
    };

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", commands::format_user_error(&err));
            EXIT_FAILURE
        }
    }
}

/// First interrupt: cancel and allow a graceful shutdown window. Second
/// interrupt (or a timed-out shutdown): force exit.
fn spawn_interrupt_handler(cancel: eb_sync::CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("Received interrupt. Cleaning up before exiting...");
        cancel.cancel(CancelReason::Interrupt);

        tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
            eprintln!("Timed out cleaning up. Forcing exit.");
            std::process::exit(i32::from(EXIT_FORCED));
        });

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Received second interrupt. Forcing exit.");
            std::process::exit(i32::from(EXIT_FORCED));
        }
    });
}
