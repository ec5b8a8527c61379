mod commands;

use clap::{Parser, Subcommand};
use commands::{Context, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_INPUT_ERROR};
use kiln_core::BuildRequest;
use kiln_runtime::{select_runtime, OverlayRunner, RunnerOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Build application and builder container images from overlay layers."
)]
struct Cli {
    /// Registry host images are qualified with and pushed to.
    #[arg(long, env = "KILN_REGISTRY", global = true)]
    registry: Option<String>,

    /// Layer root containing basename.txt, version.txt and builder/<type>/.
    #[arg(long, default_value = "/opt/kiln/layers", global = true)]
    layer_path: PathBuf,

    /// Container runtime backend (docker, mock).
    #[arg(long, default_value = "docker", global = true)]
    runtime: String,

    /// Output results as JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable debug logging and stream container output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build and push the application image for one commit.
    Build {
        /// Git repository location (file:// paths are copied, not cloned).
        #[arg(long)]
        url: String,
        /// Commit or ref to build.
        #[arg(long)]
        sha: String,
        /// Directory inside the repository holding manifest.toml.
        #[arg(long, default_value = ".")]
        rel: String,
        /// Directory the manifest is copied to.
        #[arg(long)]
        manifest_dir: PathBuf,
        /// Build even if the image already exists (also set by a non-empty REBUILD_IMAGE).
        #[arg(long, default_value_t = false)]
        rebuild: bool,
    },
    /// Rebuild every builder layer from the base image.
    Boot,
}

impl Commands {
    fn needs_git(&self) -> bool {
        matches!(self, Commands::Build { .. })
    }
}

fn resolve_registry(flag: Option<String>) -> Option<String> {
    flag.or_else(|| std::env::var("REGISTRY").ok())
        .map(|r| r.trim().trim_end_matches('/').to_owned())
        .filter(|r| !r.is_empty())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty())
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let Some(registry) = resolve_registry(cli.registry) else {
        eprintln!("error: config error: no registry host (pass --registry or set KILN_REGISTRY or REGISTRY)");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };
    let runtime = match select_runtime(&cli.runtime) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: config error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if runtime.name() != "mock" && std::env::var("KILN_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = if cli.command.needs_git() {
            kiln_runtime::check_build_prereqs()
        } else {
            kiln_runtime::check_boot_prereqs()
        };
        if !missing.is_empty() {
            eprintln!("error: {}", kiln_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let ctx = Context {
        runner: OverlayRunner::new(
            runtime,
            RunnerOptions::new(&registry).with_log_output(cli.verbose),
        ),
        layer_path: cli.layer_path,
        json: cli.json,
        interactive: !cli.verbose && !cli.trace && !cli.json,
    };

    let result = match cli.command {
        Commands::Build {
            url,
            sha,
            rel,
            manifest_dir,
            rebuild,
        } => commands::build::run(
            &ctx,
            &BuildRequest::new(url, sha, rel),
            &manifest_dir,
            rebuild || env_flag("REBUILD_IMAGE"),
        ),
        Commands::Boot => commands::boot::run(&ctx),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("input error:") || msg.starts_with("manifest error:") {
                EXIT_INPUT_ERROR
            } else if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
