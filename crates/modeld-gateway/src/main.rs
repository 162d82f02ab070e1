//! modeld — local model-serving daemon.
//!
//! Discovers `*.gguf` artifacts in a models directory, loads them on demand
//! behind per-model engine processes (or a deterministic stub when no engine
//! binary is configured), and streams inference output as NDJSON.
//!
//! Configuration comes from CLI flags, environment variables, and an
//! optional config file; explicit flags win over file values, which win
//! over built-in defaults.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use modeld_core::config::expand_home;
use modeld_core::{FileSettings, Settings};
use modeld_gateway::{AppState, Metrics, ShutdownCoordinator, server, shutdown};
use modeld_manager::{InstanceManager, ModelCatalog};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "modeld",
    version,
    about = "Local model-serving daemon for GGUF artifacts"
)]
struct Cli {
    /// HTTP listen address, e.g. 127.0.0.1:8080
    #[arg(long, env = "MODELD_ADDR")]
    addr: Option<String>,

    /// Optional config file (yaml|yml|json|toml, chosen by extension)
    #[arg(long, env = "MODELD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to scan for *.gguf model files
    #[arg(long, env = "MODELD_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Default model id when a request omits `model`
    #[arg(long)]
    default_model: Option<String>,

    /// Maximum simultaneously loaded instances (0 = unlimited)
    #[arg(long)]
    max_instances: Option<usize>,

    /// Queued requests per instance before 429
    #[arg(long)]
    max_queue_depth: Option<usize>,

    /// Longest a request may wait for admission, in seconds
    #[arg(long)]
    max_wait_secs: Option<u64>,

    /// Graceful shutdown budget, in seconds
    #[arg(long)]
    shutdown_grace_secs: Option<u64>,

    /// Maximum request body size in bytes for JSON endpoints
    #[arg(long)]
    max_body_bytes: Option<usize>,

    /// Path to the llama.cpp server binary; enables the subprocess backend
    #[arg(long, env = "MODELD_LLAMA_BIN")]
    llama_bin: Option<PathBuf>,

    /// Context window size passed to the engine
    #[arg(long)]
    llama_ctx: Option<u32>,

    /// Engine threads (0 = auto)
    #[arg(long)]
    llama_threads: Option<u32>,

    /// Seconds a spawned engine may take to report ready
    #[arg(long)]
    startup_timeout_secs: Option<u64>,

    /// Enable permissive CORS
    #[arg(long)]
    cors: bool,
}

/// Layer explicit flags over the file-merged settings.
fn apply_cli(settings: &mut Settings, cli: &Cli) {
    if let Some(ref v) = cli.addr {
        settings.addr = v.clone();
    }
    if let Some(ref v) = cli.models_dir {
        settings.models_dir = v.clone();
    }
    if let Some(ref v) = cli.default_model {
        settings.default_model = Some(v.clone());
    }
    if let Some(v) = cli.max_instances {
        settings.max_instances = v;
    }
    if let Some(v) = cli.max_queue_depth {
        settings.max_queue_depth = v;
    }
    if let Some(v) = cli.max_wait_secs {
        settings.max_wait = std::time::Duration::from_secs(v);
    }
    if let Some(v) = cli.shutdown_grace_secs {
        settings.shutdown_grace = std::time::Duration::from_secs(v);
    }
    if let Some(v) = cli.max_body_bytes {
        settings.max_body_bytes = v;
    }
    if let Some(ref v) = cli.llama_bin {
        settings.llama_bin = Some(v.clone());
    }
    if let Some(v) = cli.llama_ctx {
        settings.llama_ctx = v;
    }
    if let Some(v) = cli.llama_threads {
        settings.llama_threads = v;
    }
    if let Some(v) = cli.startup_timeout_secs {
        settings.startup_timeout = std::time::Duration::from_secs(v);
    }
    if cli.cors {
        settings.cors = true;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modeld=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::default();
    if let Some(ref path) = cli.config {
        let file = FileSettings::load(path)?;
        settings.apply_file(&file);
    }
    apply_cli(&mut settings, &cli);
    settings.models_dir = expand_home(&settings.models_dir);

    let catalog = Arc::new(ModelCatalog::scan(&settings.models_dir)?);
    if catalog.is_empty() {
        tracing::warn!(
            dir = %settings.models_dir.display(),
            "no model artifacts found; every inference will 404"
        );
    }

    let manager = Arc::new(InstanceManager::new(catalog, settings.clone()));
    let coordinator = ShutdownCoordinator::new();
    let metrics = Arc::new(Metrics::new());
    let state = AppState::new(
        manager.clone(),
        metrics,
        coordinator.clone(),
        settings.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&settings.addr).await?;
    let server_task = tokio::spawn(server::serve(listener, state));

    shutdown::wait_for_signal().await;
    info!("termination signal received; draining");
    coordinator.drain(&manager, settings.shutdown_grace).await;

    server_task.await??;
    Ok(())
}
