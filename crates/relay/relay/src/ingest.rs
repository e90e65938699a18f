//! Live ingestion driver.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::pipeline::MessagePipeline;
use crate::routing::{ClassificationPolicy, DeadLetterEntry, FixedCategoryPolicy, RoutingDecision};
use crate::stream::{StreamQuery, StreamService};

/// One message handed to live ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Key exactly as received.
    pub key: Vec<u8>,
    /// Decoded envelope bytes, or the raw value when it could not be decoded.
    pub value: Vec<u8>,
    /// Why the value could not be decoded, if it could not.
    pub decode_error: Option<String>,
}

impl InboundMessage {
    /// Creates a message with a decoded value.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            decode_error: None,
        }
    }

    /// Creates a message whose value could not be decoded. `raw` is kept as-is.
    pub fn undecodable(key: impl Into<Vec<u8>>, raw: impl Into<Vec<u8>>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: raw.into(),
            decode_error: Some(reason.into()),
        }
    }
}

/// A message whose handling failed outside classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    /// Message key, lossily decoded for display.
    pub key: String,
    /// Error text.
    pub error: String,
    /// Stream the message was force-routed to, if the write succeeded.
    pub destination: Option<String>,
}

/// Result of one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Messages handled.
    pub processed: usize,
    /// Messages that reached their target.
    pub delivered: usize,
    /// Messages written to a dead-letter stream.
    pub dead_lettered: usize,
    /// Messages dropped by the policy.
    pub discarded: usize,
    /// Per-message errors.
    pub errors: Vec<MessageError>,
}

/// Drives a batch of live messages through the pipeline with the fixed-category policy.
#[derive(Clone)]
pub struct LiveIngestionDriver {
    compartment_id: String,
    policy: FixedCategoryPolicy,
    streams: Arc<dyn StreamService>,
    pipeline: MessagePipeline,
}

impl LiveIngestionDriver {
    pub fn new(config: &RelayConfig, streams: Arc<dyn StreamService>, pipeline: MessagePipeline) -> Self {
        Self {
            compartment_id: config.compartment_id.clone(),
            policy: FixedCategoryPolicy::new(config.dead_letters.clone()),
            streams,
            pipeline,
        }
    }

    /// Checks that every fixed dead-letter stream exists and is active.
    pub async fn verify_prerequisites(&self) -> RelayResult<()> {
        for stream_id in self.policy.streams().all() {
            let query = StreamQuery::active(&self.compartment_id, stream_id);
            let found = self.streams.list_streams(&query).await?;
            if found.is_empty() {
                tracing::error!(
                    "Dead-letter stream {} is missing or not active in compartment {}",
                    stream_id,
                    self.compartment_id
                );
                return Err(RelayError::PrerequisiteMissing(format!(
                    "stream {} is not active in compartment {}",
                    stream_id, self.compartment_id
                )));
            }
        }
        Ok(())
    }

    /// Processes a batch. Fails without touching any message when a
    /// dead-letter stream is unavailable; otherwise every message is handled
    /// independently.
    pub async fn ingest(&self, messages: Vec<InboundMessage>) -> RelayResult<IngestSummary> {
        self.verify_prerequisites().await?;

        let mut summary = IngestSummary::default();

        for message in &messages {
            summary.processed += 1;

            let failure = match &message.decode_error {
                Some(reason) => RelayError::MalformedEnvelope(reason.clone()),
                None => match self
                    .pipeline
                    .process(&message.key, &message.value, &self.policy)
                    .await
                {
                    Ok(report) => {
                        if report.outcome.is_delivered() {
                            summary.delivered += 1;
                        } else if report.receipt.is_some() {
                            summary.dead_lettered += 1;
                        } else if matches!(report.decision, RoutingDecision::Discard(_)) {
                            summary.discarded += 1;
                        }
                        continue;
                    }
                    Err(e) if e.is_batch_fatal() => return Err(e),
                    Err(e) => e,
                },
            };

            let error = self.force_route(message, &failure).await;
            if error.destination.is_some() {
                summary.dead_lettered += 1;
            }
            summary.errors.push(error);
        }

        tracing::info!(
            "Ingested {} messages: {} delivered, {} dead-lettered, {} discarded, {} errors",
            summary.processed,
            summary.delivered,
            summary.dead_lettered,
            summary.discarded,
            summary.errors.len()
        );

        Ok(summary)
    }

    async fn force_route(&self, message: &InboundMessage, failure: &RelayError) -> MessageError {
        let key = String::from_utf8_lossy(&message.key).into_owned();
        tracing::warn!("Error handling message with key '{}': {}", key, failure);

        let entry = DeadLetterEntry {
            key: &message.key,
            value: &message.value,
        };
        let destination = match self.pipeline.router().route(&self.policy.fallback(), entry).await {
            Ok(receipt) => receipt.map(|r| r.stream_id),
            Err(e) => {
                tracing::error!("Could not dead-letter message with key '{}': {}", key, e);
                None
            }
        };

        MessageError {
            key,
            error: failure.to_string(),
            destination,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeadLetterStreams, HttpConfig};
    use crate::dispatch::Dispatcher;
    use crate::routing::Router;
    use crate::secret::{InMemorySecretStore, SecretResolver};
    use crate::stream::{InMemoryStreamService, LifecycleState};

    const DLQS: [&str; 4] = ["unrecoverable", "unavailable", "internal", "default"];

    async fn driver() -> (LiveIngestionDriver, Arc<InMemoryStreamService>) {
        let streams = Arc::new(InMemoryStreamService::new());
        for id in DLQS {
            streams.create_stream_with_id(id, id, "c-1", 1).await;
        }
        let config = RelayConfig::new(DeadLetterStreams::new(DLQS[0], DLQS[1], DLQS[2], DLQS[3]), "c-1");
        let pipeline = MessagePipeline::new(
            SecretResolver::new(InMemorySecretStore::shared(), None),
            Dispatcher::new(&HttpConfig::default()).unwrap(),
            Router::new(streams.clone()),
        );
        (LiveIngestionDriver::new(&config, streams.clone(), pipeline), streams)
    }

    #[tokio::test]
    async fn test_prerequisites_pass_when_all_active() {
        let (driver, _) = driver().await;
        assert!(driver.verify_prerequisites().await.is_ok());
    }

    #[tokio::test]
    async fn test_inactive_stream_fails_before_processing() {
        let (driver, streams) = driver().await;
        streams
            .set_lifecycle_state("internal", LifecycleState::Updating)
            .await
            .unwrap();

        let err = driver
            .ingest(vec![InboundMessage::new("k", "not json")])
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::PrerequisiteMissing(_)));
        for id in DLQS {
            assert!(streams.messages(id).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_stream_in_other_compartment_is_missing() {
        let (driver, streams) = driver().await;
        streams.create_stream_with_id("default", "default", "c-2", 1).await;

        assert!(matches!(
            driver.verify_prerequisites().await,
            Err(RelayError::PrerequisiteMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_force_routed() {
        let (driver, streams) = driver().await;

        let summary = driver
            .ingest(vec![InboundMessage::undecodable("k1", "%%%", "invalid base64")])
            .await
            .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.dead_lettered, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].key, "k1");
        assert_eq!(summary.errors[0].destination.as_deref(), Some("unrecoverable"));
        assert_eq!(streams.messages("unrecoverable").await[0].value, b"%%%".to_vec());
    }

    #[tokio::test]
    async fn test_malformed_message_is_dead_lettered() {
        let (driver, streams) = driver().await;

        let summary = driver
            .ingest(vec![InboundMessage::new("k1", "{}")])
            .await
            .unwrap();

        assert_eq!(summary.dead_lettered, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(streams.messages("unrecoverable").await.len(), 1);
    }
}
