//! Per-message pipeline: parse, resolve, dispatch, classify, route.

use serde::{Deserialize, Serialize};

use crate::dispatch::{Dispatcher, RelayOutcome};
use crate::envelope::Envelope;
use crate::error::RelayResult;
use crate::routing::{ClassificationPolicy, DeadLetterEntry, RouteReceipt, Router, RoutingDecision};
use crate::secret::SecretResolver;

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReport {
    /// Outcome of the relay attempt.
    pub outcome: RelayOutcome,
    /// Decision made by the classification policy.
    pub decision: RoutingDecision,
    /// Where the message was written, if it was.
    pub receipt: Option<RouteReceipt>,
}

/// Runs one message through the relay. Stateless between messages.
#[derive(Clone)]
pub struct MessagePipeline {
    resolver: SecretResolver,
    dispatcher: Dispatcher,
    router: Router,
}

impl MessagePipeline {
    pub fn new(resolver: SecretResolver, dispatcher: Dispatcher, router: Router) -> Self {
        Self {
            resolver,
            dispatcher,
            router,
        }
    }

    /// Returns the router used for dead-letter writes.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Parses, resolves and dispatches a raw envelope.
    ///
    /// Parse and credential failures become outcomes; nothing here returns early
    /// with an error.
    pub async fn relay(&self, raw: &[u8]) -> RelayOutcome {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => return RelayOutcome::from_error(&e),
        };

        let token = match self.resolver.resolve(envelope.credential.as_ref()).await {
            Ok(token) => token,
            Err(e) => return RelayOutcome::from_error(&e),
        };

        self.dispatcher.dispatch(&envelope, token.as_deref()).await
    }

    /// Relays one message and routes it according to `policy`.
    ///
    /// The dead-letter write uses `key` and `raw` exactly as received. The only
    /// error returned is a failed dead-letter write.
    pub async fn process(
        &self,
        key: &[u8],
        raw: &[u8],
        policy: &dyn ClassificationPolicy,
    ) -> RelayResult<MessageReport> {
        let outcome = self.relay(raw).await;
        let decision = policy.classify(&outcome);

        match outcome.to_error() {
            None => tracing::debug!(
                "Message with key '{}' delivered with status {:?}",
                String::from_utf8_lossy(key),
                outcome.status_code()
            ),
            Some(err) => tracing::warn!(
                "Message with key '{}' failed: {}, decision {:?}",
                String::from_utf8_lossy(key),
                err,
                decision
            ),
        }

        let receipt = self
            .router
            .route(&decision, DeadLetterEntry { key, value: raw })
            .await?;

        Ok(MessageReport {
            outcome,
            decision,
            receipt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeadLetterStreams, HttpConfig};
    use crate::routing::FixedCategoryPolicy;
    use crate::secret::InMemorySecretStore;
    use crate::stream::InMemoryStreamService;
    use std::sync::Arc;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MessagePipeline, Arc<InMemoryStreamService>, Arc<InMemorySecretStore>) {
        let streams = Arc::new(InMemoryStreamService::new());
        for id in ["unrecoverable", "unavailable", "internal", "default"] {
            streams.create_stream_with_id(id, id, "c-1", 1).await;
        }
        let secrets = InMemorySecretStore::shared();
        let pipeline = MessagePipeline::new(
            SecretResolver::new(secrets.clone(), Some("vault-1".into())),
            Dispatcher::new(&HttpConfig::default()).unwrap(),
            Router::new(streams.clone()),
        );
        (pipeline, streams, secrets)
    }

    fn policy() -> FixedCategoryPolicy {
        FixedCategoryPolicy::new(DeadLetterStreams::new("unrecoverable", "unavailable", "internal", "default"))
    }

    #[tokio::test]
    async fn test_delivered_message_is_not_routed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let (pipeline, streams, _) = setup().await;

        let raw = format!(
            r#"{{"targetRestApi":"{}/x","targetRestApiOperation":"POST","targetRestApiPayload":{{"a":1}}}}"#,
            server.uri()
        );
        let report = pipeline.process(b"k1", raw.as_bytes(), &policy()).await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Delivered(200));
        assert_eq!(report.decision, RoutingDecision::NoAction);
        assert!(report.receipt.is_none());
        assert!(streams.messages("default").await.is_empty());
    }

    #[tokio::test]
    async fn test_credential_is_sent_as_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let (pipeline, _, secrets) = setup().await;
        secrets.insert_named("vault-1", "api-token", "Bearer s3cret").await;

        let raw = format!(
            r#"{{"targetRestApi":"{}","targetRestApiOperation":"PUT","vaultSecretName":"api-token"}}"#,
            server.uri()
        );
        let report = pipeline.process(b"k1", raw.as_bytes(), &policy()).await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Delivered(204));
    }

    #[tokio::test]
    async fn test_missing_secret_goes_to_unrecoverable() {
        let server = MockServer::start().await;
        let (pipeline, streams, _) = setup().await;

        let raw = format!(
            r#"{{"targetRestApi":"{}","targetRestApiOperation":"PUT","vaultSecretName":"nope"}}"#,
            server.uri()
        );
        let report = pipeline.process(b"k1", raw.as_bytes(), &policy()).await.unwrap();

        assert!(matches!(report.outcome, RelayOutcome::CredentialUnavailable(_)));
        assert_eq!(streams.messages("unrecoverable").await.len(), 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_routes_raw_bytes() {
        let (pipeline, streams, _) = setup().await;

        let raw = b"{not json";
        let report = pipeline.process(b"k9", raw, &policy()).await.unwrap();

        assert!(matches!(report.outcome, RelayOutcome::Malformed(_)));
        assert_eq!(report.receipt.unwrap().stream_id, "unrecoverable");
        let stored = streams.messages("unrecoverable").await;
        assert_eq!(stored[0].value, raw.to_vec());
        assert_eq!(stored[0].key.as_deref(), Some(&b"k9"[..]));
    }

    #[tokio::test]
    async fn test_failed_dead_letter_write_is_an_error() {
        let (pipeline, _, _) = setup().await;
        let policy = FixedCategoryPolicy::new(DeadLetterStreams::new("gone", "gone", "gone", "gone"));

        assert!(pipeline.process(b"k", b"[]", &policy).await.is_err());
    }
}
