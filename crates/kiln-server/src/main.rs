use clap::Parser;
use kiln_runtime::{select_runtime, OverlayRunner, RunnerOptions};
use kiln_server::{BuildService, ServerConfig, ServiceConfig, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kilnd", version, about = "kiln build daemon")]
struct Cli {
    /// TOML file providing `registry_host` and `scratch_dir`.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config_file: PathBuf,

    /// Registry host images are pushed to; overrides the config file.
    #[arg(long)]
    registry: Option<String>,

    /// Layer root containing basename.txt, version.txt and builder/<type>/.
    #[arg(long, default_value = "/opt/kiln/layers")]
    layer_path: PathBuf,

    /// Directory receiving a manifest copy per build id.
    #[arg(long, default_value = "/opt/kiln/manifests")]
    manifest_dir: PathBuf,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Container runtime backend (docker, mock).
    #[arg(long, default_value = "docker")]
    runtime: String,
}

fn start(cli: Cli) -> Result<(), String> {
    let file_config = ServerConfig::load_or_default(&cli.config_file).map_err(|e| e.to_string())?;
    let registry = file_config
        .resolve_registry(cli.registry.as_deref())
        .map_err(|e| e.to_string())?;

    let runtime = select_runtime(&cli.runtime).map_err(|e| e.to_string())?;
    if !runtime.available() {
        return Err(format!("container runtime '{}' is not available", runtime.name()));
    }
    std::fs::create_dir_all(&cli.manifest_dir)
        .map_err(|e| format!("cannot create {}: {e}", cli.manifest_dir.display()))?;

    let runner = OverlayRunner::new(runtime, RunnerOptions::new(&registry));
    let mut config = ServiceConfig::new(cli.layer_path, cli.manifest_dir);
    config.scratch_root = file_config.scratch_dir;

    info!("registry: {registry}");
    info!("layer root: {}", config.layer_root.display());
    info!("manifest dir: {}", config.manifest_root.display());

    let service = Arc::new(BuildService::new(runner, config));
    let addr = format!("0.0.0.0:{}", cli.port);
    info!("starting kilnd on {addr}");
    kiln_server::run_server(&service, &addr).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match start(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            error!("{msg}");
            eprintln!("kilnd: {msg}");
            ExitCode::from(3)
        }
    }
}
