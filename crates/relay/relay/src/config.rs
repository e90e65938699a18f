//! Relay configuration.
//!
//! Built once at startup and passed by reference into the drivers.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Environment variable holding the unrecoverable dead-letter stream ID.
pub const ENV_UNRECOVERABLE_STREAM: &str = "unrecoverable_error_stream_ocid";
/// Environment variable holding the service-unavailable dead-letter stream ID.
pub const ENV_SERVICE_UNAVAILABLE_STREAM: &str = "serviceUnavailable_error_stream_ocid";
/// Environment variable holding the internal-error dead-letter stream ID.
pub const ENV_INTERNAL_ERROR_STREAM: &str = "internalserver_error_stream_ocid";
/// Environment variable holding the default dead-letter stream ID.
pub const ENV_DEFAULT_STREAM: &str = "default_error_stream_ocid";
/// Environment variable holding the compartment the dead-letter streams live in.
pub const ENV_COMPARTMENT: &str = "stream_compartment_ocid";
/// Environment variable holding the vault used for secrets addressed by name.
pub const ENV_VAULT: &str = "vault_ocid";

/// Default number of messages pulled by one replay call.
pub const DEFAULT_REPLAY_BATCH: usize = 10;

/// The four fixed dead-letter destinations used by live ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterStreams {
    /// Malformed input, 400 responses and unresolvable credentials.
    pub unrecoverable: String,
    /// 503 responses.
    pub service_unavailable: String,
    /// 500 responses.
    pub internal_error: String,
    /// Every other failure.
    pub default: String,
}

impl DeadLetterStreams {
    /// Creates the destination set.
    pub fn new(
        unrecoverable: impl Into<String>,
        service_unavailable: impl Into<String>,
        internal_error: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self {
            unrecoverable: unrecoverable.into(),
            service_unavailable: service_unavailable.into(),
            internal_error: internal_error.into(),
            default: default.into(),
        }
    }

    /// Returns the stream IDs in prerequisite-check order.
    pub fn all(&self) -> [&str; 4] {
        [
            &self.unrecoverable,
            &self.service_unavailable,
            &self.internal_error,
            &self.default,
        ]
    }
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in milliseconds. `None` leaves the transport default.
    pub timeout_ms: Option<u64>,
}

/// Replay settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Maximum messages read by one replay call.
    pub max_batch: usize,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            max_batch: DEFAULT_REPLAY_BATCH,
        }
    }
}

/// Process-wide relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Fixed dead-letter destinations.
    pub dead_letters: DeadLetterStreams,
    /// Compartment the dead-letter streams must be active in.
    pub compartment_id: String,
    /// Vault for secrets referenced by name.
    pub vault_id: Option<String>,
    /// Outbound HTTP settings.
    pub http: HttpConfig,
    /// Replay settings.
    pub replay: ReplaySettings,
}

impl RelayConfig {
    /// Creates a new configuration.
    pub fn new(dead_letters: DeadLetterStreams, compartment_id: impl Into<String>) -> Self {
        Self {
            dead_letters,
            compartment_id: compartment_id.into(),
            ..Default::default()
        }
    }

    /// Sets the vault ID.
    pub fn vault_id(mut self, vault_id: impl Into<String>) -> Self {
        self.vault_id = Some(vault_id.into());
        self
    }

    /// Sets the outbound request timeout.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.http.timeout_ms = Some(ms);
        self
    }

    /// Sets the replay batch size.
    pub fn replay_max_batch(mut self, max: usize) -> Self {
        self.replay.max_batch = max;
        self
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| RelayError::Config(format!("{} is not set", name)))
        };

        let config = Self {
            dead_letters: DeadLetterStreams::new(
                required(ENV_UNRECOVERABLE_STREAM)?,
                required(ENV_SERVICE_UNAVAILABLE_STREAM)?,
                required(ENV_INTERNAL_ERROR_STREAM)?,
                required(ENV_DEFAULT_STREAM)?,
            ),
            compartment_id: required(ENV_COMPARTMENT)?,
            vault_id: lookup(ENV_VAULT).filter(|v| !v.is_empty()),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Overlays any environment values found through `lookup` on this configuration.
    pub fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |slot: &mut String, name: &str| {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        };
        set(&mut self.dead_letters.unrecoverable, ENV_UNRECOVERABLE_STREAM);
        set(&mut self.dead_letters.service_unavailable, ENV_SERVICE_UNAVAILABLE_STREAM);
        set(&mut self.dead_letters.internal_error, ENV_INTERNAL_ERROR_STREAM);
        set(&mut self.dead_letters.default, ENV_DEFAULT_STREAM);
        set(&mut self.compartment_id, ENV_COMPARTMENT);
        if let Some(vault) = lookup(ENV_VAULT).filter(|v| !v.is_empty()) {
            self.vault_id = Some(vault);
        }
        self
    }

    /// Checks that every required value is present.
    pub fn validate(&self) -> RelayResult<()> {
        let names = ["unrecoverable", "service_unavailable", "internal_error", "default"];
        for (name, id) in names.iter().zip(self.dead_letters.all()) {
            if id.is_empty() {
                return Err(RelayError::Config(format!(
                    "dead-letter stream '{}' is not configured",
                    name
                )));
            }
        }
        if self.compartment_id.is_empty() {
            return Err(RelayError::Config("compartment_id is not configured".into()));
        }
        if self.replay.max_batch == 0 {
            return Err(RelayError::Config("replay.max_batch must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env() -> HashMap<&'static str, String> {
        HashMap::from([
            (ENV_UNRECOVERABLE_STREAM, "dlq-unrecoverable".to_string()),
            (ENV_SERVICE_UNAVAILABLE_STREAM, "dlq-503".to_string()),
            (ENV_INTERNAL_ERROR_STREAM, "dlq-500".to_string()),
            (ENV_DEFAULT_STREAM, "dlq-default".to_string()),
            (ENV_COMPARTMENT, "compartment-1".to_string()),
        ])
    }

    #[test]
    fn test_from_lookup() {
        let vars = env();
        let config = RelayConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.dead_letters.unrecoverable, "dlq-unrecoverable");
        assert_eq!(config.dead_letters.service_unavailable, "dlq-503");
        assert_eq!(config.dead_letters.internal_error, "dlq-500");
        assert_eq!(config.dead_letters.default, "dlq-default");
        assert_eq!(config.compartment_id, "compartment-1");
        assert_eq!(config.vault_id, None);
        assert_eq!(config.replay.max_batch, DEFAULT_REPLAY_BATCH);
    }

    #[test]
    fn test_from_lookup_missing_stream() {
        let mut vars = env();
        vars.remove(ENV_INTERNAL_ERROR_STREAM);

        let err = RelayConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_INTERNAL_ERROR_STREAM));
    }

    #[test]
    fn test_overlay_replaces_only_present_values() {
        let base = RelayConfig::new(DeadLetterStreams::new("a", "b", "c", "d"), "comp");
        let overlaid = base.overlay(|k| (k == ENV_DEFAULT_STREAM).then(|| "z".to_string()));

        assert_eq!(overlaid.dead_letters.all(), ["a", "b", "c", "z"]);
        assert_eq!(overlaid.compartment_id, "comp");
    }

    #[test]
    fn test_validate() {
        let config = RelayConfig::new(DeadLetterStreams::new("a", "b", "c", "d"), "comp");
        assert!(config.validate().is_ok());

        let zero_batch = config.clone().replay_max_batch(0);
        assert!(zero_batch.validate().is_err());

        let missing = RelayConfig::new(DeadLetterStreams::new("a", "", "c", "d"), "comp");
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "dead_letters": {
                "unrecoverable": "a",
                "service_unavailable": "b",
                "internal_error": "c",
                "default": "d"
            },
            "compartment_id": "comp"
        }))
        .unwrap();

        assert_eq!(config.replay.max_batch, 10);
        assert_eq!(config.http.timeout_ms, None);
    }
}
