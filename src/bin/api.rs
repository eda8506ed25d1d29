use anyhow::Context;
use clap::Parser;
use graph_agent::LogFormat;
use graph_agent::api::{AppState, serve};
use graph_agent::core::config::{AppConfig, load_dotenv};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Serve the graph-agent HTTP API.
#[derive(Debug, Parser)]
#[command(name = "graph-agent-api", version)]
struct Args {
    /// Address to bind (overrides BIND_ADDR)
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to bind (overrides BIND_ADDR)
    #[arg(long)]
    port: Option<u16>,

    /// Runtime worker threads (overrides WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Human-readable debug logs instead of JSON
    #[arg(long)]
    dev: bool,

    /// Directory for rolling log files (overrides LOG_DIR)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let dotenv = load_dotenv();
    let mut config = AppConfig::from_env().context("Failed to load configuration")?;

    let host = args.host.unwrap_or(config.bind_addr.ip());
    let port = args.port.unwrap_or(config.bind_addr.port());
    config.bind_addr = SocketAddr::new(host, port);
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if args.log_dir.is_some() {
        config.log_dir = args.log_dir;
    }

    let (format, level) = if args.dev {
        (LogFormat::Pretty, "debug")
    } else {
        (LogFormat::Json, "info")
    };
    let _guard = graph_agent::setup_logging(format, level, config.log_dir.as_deref());

    match dotenv {
        Ok(Some(path)) => debug!("Loaded environment variables from: {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("Skipped .env file: {}", e),
    }

    info!(
        bind_addr = %config.bind_addr,
        workers = config.workers,
        chat_model = %config.chat_completion_model,
        whisper_model = %config.whisper_model,
        "Starting graph-agent API"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async {
        let state = AppState::new(&config)?;
        serve(&config, state).await
    })?;

    Ok(())
}
