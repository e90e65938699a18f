//! Stream relay runner binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stream_relay_server::{LocalRelay, ServerError, load_config};
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stream-relay")]
#[command(about = "Relay REST calls carried on a stream, with dead-letter routing and replay", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STREAM_RELAY_CONFIG", default_value = "stream-relay.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live-ingestion request body
    Ingest {
        /// File holding the request body; stdin when omitted
        #[arg(short, long)]
        body: Option<PathBuf>,
    },
    /// Run a replay request body
    Replay {
        /// File holding the request body; stdin when omitted
        #[arg(short, long)]
        body: Option<PathBuf>,
    },
}

async fn read_body(path: Option<PathBuf>) -> Result<String, ServerError> {
    match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ServerError::IoError(format!("{}: {}", path.display(), e))),
        None => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .map_err(|e| ServerError::IoError(e.to_string()))?;
            Ok(body)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?.with_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let relay = LocalRelay::from_config(&config).await?;

    let response = match cli.command {
        Commands::Ingest { body } => relay.handler.handle_ingest(&read_body(body).await?).await,
        Commands::Replay { body } => relay.handler.handle_replay(&read_body(body).await?).await,
    };

    for stream in &config.streams {
        let messages = relay.streams.messages(&stream.id).await;
        if !messages.is_empty() {
            tracing::info!("Stream {} holds {} messages", stream.id, messages.len());
        }
    }

    println!("{} {}", response.status, response.body);
    if response.status != 200 {
        std::process::exit(1);
    }

    Ok(())
}
