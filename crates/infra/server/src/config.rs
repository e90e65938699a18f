//! Runner configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stream_relay::RelayConfig;

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Log level, used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// A stream to create in the local stream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream ID.
    pub id: String,
    /// Stream name. Defaults to the ID.
    pub name: Option<String>,
    /// Compartment. Defaults to the relay's compartment.
    pub compartment_id: Option<String>,
    /// Partition count.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
}

fn default_partitions() -> u32 {
    1
}

/// Secrets to load into the local secret store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Secrets addressed by name, stored in the relay's vault.
    pub by_name: HashMap<String, String>,
    /// Secrets addressed by ID.
    pub by_id: HashMap<String, String>,
}

/// Everything the runner reads from its configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// `[server]` table.
    pub server: ServerConfig,
    /// `[relay]` table.
    pub relay: RelayConfig,
    /// `[[streams]]` entries.
    pub streams: Vec<StreamConfig>,
    /// `[secrets]` table.
    pub secrets: SecretsConfig,
}

impl RunnerConfig {
    /// Overlays relay settings found in the environment.
    pub fn with_env(self) -> Self {
        self.with_lookup(|name| std::env::var(name).ok())
    }

    /// Overlays relay settings found through `lookup`.
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        self.relay = self.relay.overlay(lookup);
        self
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &str) -> Result<RunnerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<RunnerConfig, ConfigError> {
    let config: toml::Value =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(RunnerConfig {
        server: section(&config, "server")?,
        relay: section(&config, "relay")?,
        streams: section(&config, "streams")?,
        secrets: section(&config, "secrets")?,
    })
}

fn section<T: DeserializeOwned + Default>(config: &toml::Value, name: &str) -> Result<T, ConfigError> {
    config
        .get(name)
        .map(|v| toml::Value::try_into(v.clone()))
        .transpose()
        .map_err(|e| ConfigError::ParseError(format!("[{}]: {}", name, e)))
        .map(Option::unwrap_or_default)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_relay::{DEFAULT_REPLAY_BATCH, ENV_COMPARTMENT};

    const SAMPLE: &str = r#"
[server]
log_level = "debug"

[relay]
compartment_id = "compartment-1"
vault_id = "vault-1"

[relay.dead_letters]
unrecoverable = "dlq-400"
service_unavailable = "dlq-503"
internal_error = "dlq-500"
default = "dlq-default"

[relay.http]
timeout_ms = 2500

[[streams]]
id = "dlq-400"

[[streams]]
id = "orders"
name = "orders-retry"
partitions = 3

[secrets.by_name]
api-token = "Bearer abc"
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();

        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.relay.compartment_id, "compartment-1");
        assert_eq!(config.relay.vault_id.as_deref(), Some("vault-1"));
        assert_eq!(config.relay.dead_letters.service_unavailable, "dlq-503");
        assert_eq!(config.relay.http.timeout_ms, Some(2500));
        assert_eq!(config.relay.replay.max_batch, DEFAULT_REPLAY_BATCH);
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].partitions, 1);
        assert_eq!(config.streams[1].name.as_deref(), Some("orders-retry"));
        assert_eq!(config.secrets.by_name["api-token"], "Bearer abc");
        assert!(config.relay.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();

        assert_eq!(config.server.log_level, "info");
        assert!(config.streams.is_empty());
        assert!(config.relay.validate().is_err());
    }

    #[test]
    fn test_environment_overrides_relay_section() {
        let config = parse_config(SAMPLE)
            .unwrap()
            .with_lookup(|name| (name == ENV_COMPARTMENT).then(|| "compartment-2".to_string()));

        assert_eq!(config.relay.compartment_id, "compartment-2");
        assert_eq!(config.relay.dead_letters.unrecoverable, "dlq-400");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_config("[server"), Err(ConfigError::ParseError(_))));
        assert!(matches!(
            load_config("/nonexistent/stream-relay.toml"),
            Err(ConfigError::IoError(_))
        ));
    }
}
