//! # Stream Relay Server
//!
//! Local runner for the stream relay. Builds in-memory stream and secret
//! services from a TOML file and feeds request bodies to the relay's entry
//! points.

mod config;

pub use config::{ConfigError, RunnerConfig, SecretsConfig, ServerConfig, StreamConfig, load_config, parse_config};

use std::sync::Arc;
use stream_relay::{InMemorySecretStore, InMemoryStreamService, RelayError, RelayHandler};

/// Runner error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("IO error: {0}")]
    IoError(String),
}

/// A relay wired to local collaborators.
pub struct LocalRelay {
    /// Relay entry points.
    pub handler: RelayHandler,
    /// The stream service, for inspecting dead-letter streams after a run.
    pub streams: Arc<InMemoryStreamService>,
}

impl LocalRelay {
    /// Creates the configured streams and secrets and wires the relay.
    pub async fn from_config(config: &RunnerConfig) -> Result<Self, ServerError> {
        let streams = Arc::new(InMemoryStreamService::new());
        for stream in &config.streams {
            let compartment = stream
                .compartment_id
                .clone()
                .unwrap_or_else(|| config.relay.compartment_id.clone());
            let name = stream.name.clone().unwrap_or_else(|| stream.id.clone());
            streams
                .create_stream_with_id(stream.id.clone(), name, compartment, stream.partitions)
                .await;
        }

        let secrets = InMemorySecretStore::shared();
        let vault = config.relay.vault_id.clone().unwrap_or_default();
        for (name, content) in &config.secrets.by_name {
            secrets.insert_named(vault.clone(), name.clone(), content.clone()).await;
        }
        for (id, content) in &config.secrets.by_id {
            secrets.insert_id(id.clone(), content.clone()).await;
        }

        tracing::info!(
            "Local relay ready with {} streams and {} secrets",
            config.streams.len(),
            config.secrets.by_name.len() + config.secrets.by_id.len()
        );

        let handler = RelayHandler::new(&config.relay, streams.clone(), secrets)?;
        Ok(Self { handler, streams })
    }
}
