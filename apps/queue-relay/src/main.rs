mod config;
mod queue;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::{ConfigOverrides, RelayConfig};
use queue::ServiceQueue;

/// Send messages to and receive messages from an HTTP message queue
#[derive(Parser)]
#[command(name = "queue-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Post a JSON message (a sample object when `--message` is omitted)
    Send {
        /// JSON document to post
        #[arg(long)]
        message: Option<String>,
    },
    /// Read the message at the head of the queue
    Receive,
    /// Print the effective configuration and exit
    Config,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level: {level}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // defaults -> YAML (if provided) -> env (QUEUE_RELAY__*) -> CLI overrides
    let config = RelayConfig::load(cli.config.as_deref(), &cli.overrides)?;
    init_logging(&config.log_level)?;
    tracing::debug!(?config, "configuration loaded");

    let result = run(cli.command, &config).await;
    relay_http::worker_pool::shutdown();
    result
}

async fn run(command: Commands, config: &RelayConfig) -> Result<()> {
    match command {
        Commands::Send { message } => {
            let message = match message {
                Some(text) => serde_json::from_str(&text).context("--message is not valid JSON")?,
                None => queue::sample_message(),
            };
            let status = ServiceQueue::new(config)?.send_json(&message).await?;
            println!("{}", status.as_u16());
        }
        Commands::Receive => {
            let received = ServiceQueue::new(config)?.receive().await?;
            if !received.status.is_success() {
                tracing::warn!(status = %received.status, "queue answered with a non-success status");
            }
            println!("{}", received.body);
        }
        Commands::Config => println!("{}", config.to_redacted_json()?),
    }
    Ok(())
}
