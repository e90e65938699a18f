//! Failure classification and dead-letter routing.
//!
//! A [`ClassificationPolicy`] turns a [`RelayOutcome`] into a
//! [`RoutingDecision`]; the [`Router`] carries the decision out by appending
//! the original key and value, unchanged, to the chosen stream.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DeadLetterStreams;
use crate::dispatch::RelayOutcome;
use crate::error::RelayResult;
use crate::stream::{PutAck, StreamService};

/// Table key used when a status code has no entry of its own.
pub const UNMAPPED_KEY: &str = "unmapped";

/// Where a message goes after one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingDecision {
    /// Delivered; nothing to write.
    NoAction,
    /// Write the message to this stream.
    SendTo(String),
    /// The policy has no destination; the message is dropped with a warning.
    Discard(String),
}

impl RoutingDecision {
    /// Returns the destination stream, if any.
    pub fn destination(&self) -> Option<&str> {
        match self {
            RoutingDecision::SendTo(stream) => Some(stream),
            _ => None,
        }
    }
}

/// Maps relay outcomes to routing decisions.
pub trait ClassificationPolicy: Send + Sync {
    /// Classifies one outcome.
    fn classify(&self, outcome: &RelayOutcome) -> RoutingDecision;

    /// Destination for a message whose handling failed outside classification.
    fn fallback(&self) -> RoutingDecision;
}

/// Policy for live ingestion: four well-known destinations.
#[derive(Debug, Clone)]
pub struct FixedCategoryPolicy {
    streams: DeadLetterStreams,
}

impl FixedCategoryPolicy {
    /// Creates the policy over the configured destinations.
    pub fn new(streams: DeadLetterStreams) -> Self {
        Self { streams }
    }

    /// Returns the destinations.
    pub fn streams(&self) -> &DeadLetterStreams {
        &self.streams
    }
}

impl ClassificationPolicy for FixedCategoryPolicy {
    fn classify(&self, outcome: &RelayOutcome) -> RoutingDecision {
        let stream = match outcome {
            RelayOutcome::Delivered(_) => return RoutingDecision::NoAction,
            RelayOutcome::Malformed(_) | RelayOutcome::CredentialUnavailable(_) => {
                &self.streams.unrecoverable
            }
            RelayOutcome::RejectedByTarget(400) => &self.streams.unrecoverable,
            RelayOutcome::RejectedByTarget(500) => &self.streams.internal_error,
            RelayOutcome::RejectedByTarget(503) => &self.streams.service_unavailable,
            RelayOutcome::RejectedByTarget(_) | RelayOutcome::TransportFailure(_) => {
                &self.streams.default
            }
        };
        RoutingDecision::SendTo(stream.clone())
    }

    fn fallback(&self) -> RoutingDecision {
        RoutingDecision::SendTo(self.streams.unrecoverable.clone())
    }
}

/// What the table policy does with envelopes that fail to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedHandling {
    /// Route to the table's `unmapped` destination.
    #[default]
    Route,
    /// Drop after logging.
    Drop,
}

/// Policy for replay: caller-supplied status-to-stream table.
#[derive(Debug, Clone, Default)]
pub struct TablePolicy {
    table: HashMap<String, String>,
    malformed: MalformedHandling,
}

impl TablePolicy {
    /// Creates a policy from a status-code-to-stream table.
    pub fn new(table: HashMap<String, String>) -> Self {
        Self {
            table,
            malformed: MalformedHandling::default(),
        }
    }

    /// Creates a policy from `(status, stream)` pairs. Later pairs win.
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Sets how malformed envelopes are handled.
    pub fn with_malformed_handling(mut self, handling: MalformedHandling) -> Self {
        self.malformed = handling;
        self
    }

    /// Returns the configured malformed handling.
    pub fn malformed_handling(&self) -> MalformedHandling {
        self.malformed
    }

    fn unmapped(&self, why: impl FnOnce() -> String) -> RoutingDecision {
        match self.table.get(UNMAPPED_KEY) {
            Some(stream) => RoutingDecision::SendTo(stream.clone()),
            None => RoutingDecision::Discard(format!("{} and no '{}' stream", why(), UNMAPPED_KEY)),
        }
    }
}

impl ClassificationPolicy for TablePolicy {
    fn classify(&self, outcome: &RelayOutcome) -> RoutingDecision {
        match outcome {
            RelayOutcome::Delivered(_) => RoutingDecision::NoAction,
            RelayOutcome::RejectedByTarget(status) => match self.table.get(&status.to_string()) {
                Some(stream) => RoutingDecision::SendTo(stream.clone()),
                None => self.unmapped(|| format!("status {} is not mapped", status)),
            },
            RelayOutcome::Malformed(reason) => match self.malformed {
                MalformedHandling::Drop => {
                    RoutingDecision::Discard(format!("malformed envelope: {}", reason))
                }
                MalformedHandling::Route => self.unmapped(|| format!("malformed envelope: {}", reason)),
            },
            RelayOutcome::CredentialUnavailable(reason) => {
                self.unmapped(|| format!("credential unavailable: {}", reason))
            }
            RelayOutcome::TransportFailure(cause) => {
                self.unmapped(|| format!("transport failure: {}", cause))
            }
        }
    }

    fn fallback(&self) -> RoutingDecision {
        self.unmapped(|| "message handling failed".to_string())
    }
}

/// A message to be written verbatim to a dead-letter stream.
#[derive(Debug, Clone, Copy)]
pub struct DeadLetterEntry<'a> {
    /// Original key bytes.
    pub key: &'a [u8],
    /// Original value bytes.
    pub value: &'a [u8],
}

/// Where a routed message landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteReceipt {
    /// Destination stream.
    pub stream_id: String,
    /// Partition and offset assigned by the stream service.
    pub ack: PutAck,
}

/// Writes routed messages to their destination stream.
#[derive(Clone)]
pub struct Router {
    streams: Arc<dyn StreamService>,
}

impl Router {
    /// Creates a router over a stream service.
    pub fn new(streams: Arc<dyn StreamService>) -> Self {
        Self { streams }
    }

    /// Carries out a routing decision.
    ///
    /// Returns the receipt when a message was written, `None` for
    /// [`RoutingDecision::NoAction`] and [`RoutingDecision::Discard`].
    pub async fn route(
        &self,
        decision: &RoutingDecision,
        entry: DeadLetterEntry<'_>,
    ) -> RelayResult<Option<RouteReceipt>> {
        match decision {
            RoutingDecision::NoAction => Ok(None),
            RoutingDecision::Discard(reason) => {
                tracing::warn!(
                    "Discarding message with key '{}': {}",
                    String::from_utf8_lossy(entry.key),
                    reason
                );
                Ok(None)
            }
            RoutingDecision::SendTo(stream_id) => self.send_to(stream_id, entry).await.map(Some),
        }
    }

    /// Appends a message to a stream.
    pub async fn send_to(&self, stream_id: &str, entry: DeadLetterEntry<'_>) -> RelayResult<RouteReceipt> {
        match self.streams.put_message(stream_id, entry.key, entry.value).await {
            Ok(ack) => {
                tracing::info!(
                    "Message pushed to offset {} in partition {} in stream {}",
                    ack.offset,
                    ack.partition,
                    stream_id
                );
                Ok(RouteReceipt {
                    stream_id: stream_id.to_string(),
                    ack,
                })
            }
            Err(e) => {
                tracing::error!("Put message error {} in stream {}", e, stream_id);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::InMemoryStreamService;

    fn fixed() -> FixedCategoryPolicy {
        FixedCategoryPolicy::new(DeadLetterStreams::new("unrecoverable", "unavailable", "internal", "default"))
    }

    fn send_to(stream: &str) -> RoutingDecision {
        RoutingDecision::SendTo(stream.to_string())
    }

    #[test]
    fn test_fixed_policy_categories() {
        let policy = fixed();

        assert_eq!(policy.classify(&RelayOutcome::Delivered(200)), RoutingDecision::NoAction);
        assert_eq!(policy.classify(&RelayOutcome::Delivered(302)), RoutingDecision::NoAction);
        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(503)), send_to("unavailable"));
        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(500)), send_to("internal"));
        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(400)), send_to("unrecoverable"));
        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(404)), send_to("default"));
        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(502)), send_to("default"));
        assert_eq!(
            policy.classify(&RelayOutcome::Malformed("bad".into())),
            send_to("unrecoverable")
        );
        assert_eq!(
            policy.classify(&RelayOutcome::CredentialUnavailable("gone".into())),
            send_to("unrecoverable")
        );
        assert_eq!(
            policy.classify(&RelayOutcome::TransportFailure("refused".into())),
            send_to("default")
        );
        assert_eq!(policy.fallback(), send_to("unrecoverable"));
    }

    #[test]
    fn test_table_policy_exact_and_unmapped() {
        let policy = TablePolicy::from_entries([("404", "streamA"), ("unmapped", "streamB")]);

        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(404)), send_to("streamA"));
        assert_eq!(policy.classify(&RelayOutcome::RejectedByTarget(503)), send_to("streamB"));
        assert_eq!(policy.classify(&RelayOutcome::Delivered(204)), RoutingDecision::NoAction);
        assert_eq!(
            policy.classify(&RelayOutcome::TransportFailure("timeout".into())),
            send_to("streamB")
        );
    }

    #[test]
    fn test_table_policy_without_unmapped_discards() {
        let policy = TablePolicy::from_entries([("404", "streamA")]);

        assert!(matches!(
            policy.classify(&RelayOutcome::RejectedByTarget(500)),
            RoutingDecision::Discard(_)
        ));
        assert!(matches!(policy.fallback(), RoutingDecision::Discard(_)));
    }

    #[test]
    fn test_table_policy_malformed_handling() {
        let routing = TablePolicy::from_entries([("unmapped", "streamB")]);
        assert_eq!(
            routing.classify(&RelayOutcome::Malformed("no target".into())),
            send_to("streamB")
        );

        let dropping = routing.with_malformed_handling(MalformedHandling::Drop);
        match dropping.classify(&RelayOutcome::Malformed("no target".into())) {
            RoutingDecision::Discard(reason) => assert!(reason.contains("no target")),
            other => panic!("expected discard, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_router_writes_original_bytes() {
        let service = Arc::new(InMemoryStreamService::new());
        service.create_stream_with_id("dlq", "dlq", "c-1", 1).await;
        let router = Router::new(service.clone());

        let value = br#"{"targetRestApi":  "https://example.com" }"#;
        let receipt = router
            .route(&send_to("dlq"), DeadLetterEntry { key: b"order-1", value })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(receipt.stream_id, "dlq");
        assert_eq!(receipt.ack.offset, 0);

        let stored = service.messages("dlq").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].key.as_deref(), Some(&b"order-1"[..]));
        assert_eq!(stored[0].value, value.to_vec());
    }

    #[tokio::test]
    async fn test_router_no_action_and_discard_write_nothing() {
        let service = Arc::new(InMemoryStreamService::new());
        service.create_stream_with_id("dlq", "dlq", "c-1", 1).await;
        let router = Router::new(service.clone());
        let entry = DeadLetterEntry { key: b"k", value: b"v" };

        assert!(router.route(&RoutingDecision::NoAction, entry).await.unwrap().is_none());
        assert!(router
            .route(&RoutingDecision::Discard("no stream".into()), entry)
            .await
            .unwrap()
            .is_none());
        assert!(service.messages("dlq").await.is_empty());
    }

    #[tokio::test]
    async fn test_router_propagates_write_failure() {
        let router = Router::new(Arc::new(InMemoryStreamService::new()));
        let entry = DeadLetterEntry { key: b"k", value: b"v" };

        assert!(router.route(&send_to("missing"), entry).await.is_err());
    }
}
