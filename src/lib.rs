/// graph-agent - LLM agents served over HTTP.
///
/// Agents are small state graphs whose nodes call an OpenAI-compatible API:
/// 1. A chatbot that streams its replies and remembers each conversation thread
/// 2. A minute writer that transcribes a meeting recording and summarizes it
///
/// # Architecture
///
/// The system uses:
/// - axum for the HTTP API (`graph-agent-api`)
/// - reqwest for OpenAI-compatible chat and transcription calls
/// - a terminal playground client (`graph-agent-playground`)
/// - Tokio for async runtime
///
/// # Example
///
/// ```no_run
/// use graph_agent::LogFormat;
/// use graph_agent::api::{AppState, serve};
/// use graph_agent::core::config::{AppConfig, load_dotenv};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Set up structured logging
///     let _guard = graph_agent::setup_logging(LogFormat::Json, "info", None);
///
///     load_dotenv()?;
///     let config = AppConfig::from_env()?;
///     let state = AppState::new(&config)?;
///     serve(&config, state).await?;
///
///     Ok(())
/// }
/// ```
// Module declarations
pub mod agent;
pub mod ai;
pub mod api;
pub mod core;
pub mod errors;
pub mod playground;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Log file name inside `LOG_DIR`; rotated daily.
pub const LOG_FILE_NAME: &str = "graph-agent.log";

/// Console log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log collectors.
    #[default]
    Json,
    /// Human-readable compact lines on stderr.
    Pretty,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Configure structured logging.
///
/// `RUST_LOG` overrides `default_level`. With `log_dir` set, events are also
/// written as JSON to a daily rolling file; keep the returned guard alive
/// until shutdown so buffered lines are flushed.
///
/// Never panics: if a global subscriber is already installed the call only
/// reports it on stderr.
///
/// # Example
///
/// ```
/// let _guard = graph_agent::setup_logging(graph_agent::LogFormat::Pretty, "debug", None);
/// ```
pub fn setup_logging(
    format: LogFormat,
    default_level: &str,
    log_dir: Option<&Path>,
) -> Option<WorkerGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter(default_level))
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter(default_level))
            .boxed(),
    };
    layers.push(console);

    let mut guard = None;
    if let Some(dir) = log_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
                let (writer, file_guard) = tracing_appender::non_blocking(appender);
                layers.push(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_filter(env_filter(default_level))
                        .boxed(),
                );
                guard = Some(file_guard);
            }
            Err(e) => eprintln!("Cannot create log directory {}: {e}", dir.display()),
        }
    }

    if let Err(e) = tracing_subscriber::registry().with(layers).try_init() {
        eprintln!("Logging already initialized: {e}");
    }

    guard
}
