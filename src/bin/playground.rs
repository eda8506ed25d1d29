use clap::Parser;
use graph_agent::LogFormat;
use graph_agent::playground::{DEFAULT_API_BASE_URL, PlaygroundClient, run_repl};
use tokio::io::BufReader;

/// Interactive terminal client for a running graph-agent API.
#[derive(Debug, Parser)]
#[command(name = "graph-agent-playground", version)]
struct Args {
    /// Base URL of the API server
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// Show client logs on stderr
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    let _guard = graph_agent::setup_logging(LogFormat::Pretty, level, None);

    let client = PlaygroundClient::new(&args.api_base_url)?;
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();

    run_repl(client, stdin, &mut stdout).await?;
    Ok(())
}
