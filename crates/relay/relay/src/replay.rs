//! Replay driver: re-runs one bounded batch from a dead-letter stream.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RelayError, RelayResult};
use crate::pipeline::MessagePipeline;
use crate::routing::{RoutingDecision, TablePolicy};
use crate::stream::StreamService;

/// Where a replay starts reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCursor {
    /// Stream to read from.
    pub stream_id: String,
    /// Partition to read from.
    pub partition: String,
    /// First offset to read, inclusive.
    pub start_offset: u64,
}

impl ReplayCursor {
    pub fn new(stream_id: impl Into<String>, partition: impl Into<String>, start_offset: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            partition: partition.into(),
            start_offset,
        }
    }
}

/// A replayed message whose handling failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFailure {
    /// Offset of the message.
    pub offset: u64,
    /// Error text.
    pub error: String,
}

/// Result of one replay call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Offset of the last message read; `None` when nothing was read.
    pub last_offset: Option<u64>,
    /// Messages read.
    pub processed: usize,
    /// Messages delivered to their target.
    pub delivered: usize,
    /// Messages written to a destination stream.
    pub dead_lettered: usize,
    /// Messages dropped by the policy.
    pub discarded: usize,
    /// Per-message failures.
    pub errors: Vec<ReplayFailure>,
}

impl ReplayReport {
    /// Last offset with `0` standing in for "nothing read".
    pub fn last_offset_or_zero(&self) -> u64 {
        self.last_offset.unwrap_or(0)
    }
}

/// Re-drives dead-lettered messages with a caller-supplied routing table.
#[derive(Clone)]
pub struct ReplayDriver {
    streams: Arc<dyn StreamService>,
    pipeline: MessagePipeline,
}

impl ReplayDriver {
    pub fn new(streams: Arc<dyn StreamService>, pipeline: MessagePipeline) -> Self {
        Self { streams, pipeline }
    }

    /// Reads up to `max_batch` messages from `cursor` and relays each one.
    pub async fn replay(
        &self,
        cursor: &ReplayCursor,
        policy: &TablePolicy,
        max_batch: usize,
    ) -> RelayResult<ReplayReport> {
        if max_batch == 0 {
            return Err(RelayError::InvalidRequest("max batch must be at least 1".into()));
        }

        let stream = self.streams.get_stream(&cursor.stream_id).await?;
        tracing::info!(
            "Replaying stream {} ({}) partition {} from offset {}",
            stream.name,
            stream.id,
            cursor.partition,
            cursor.start_offset
        );

        let token = self
            .streams
            .create_cursor(&cursor.stream_id, &cursor.partition, cursor.start_offset)
            .await?;
        let messages = self
            .streams
            .get_messages(&cursor.stream_id, &token, max_batch)
            .await?;

        let mut report = ReplayReport::default();

        for message in &messages {
            report.processed += 1;
            report.last_offset = Some(message.offset);

            let key = message.key.as_deref().unwrap_or_default();
            match self.pipeline.process(key, &message.value, policy).await {
                Ok(result) => {
                    if result.outcome.is_delivered() {
                        report.delivered += 1;
                    } else if result.receipt.is_some() {
                        report.dead_lettered += 1;
                    } else if matches!(result.decision, RoutingDecision::Discard(_)) {
                        report.discarded += 1;
                    }
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Error replaying offset {} of stream {}: {}",
                        message.offset,
                        cursor.stream_id,
                        e
                    );
                    report.errors.push(ReplayFailure {
                        offset: message.offset,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Replayed {} messages from stream {}, last offset {:?}",
            report.processed,
            cursor.stream_id,
            report.last_offset
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::dispatch::Dispatcher;
    use crate::routing::{MalformedHandling, Router};
    use crate::secret::{InMemorySecretStore, SecretResolver};
    use crate::stream::InMemoryStreamService;

    async fn setup() -> (ReplayDriver, Arc<InMemoryStreamService>) {
        let streams = Arc::new(InMemoryStreamService::new());
        streams.create_stream_with_id("source", "source", "c-1", 1).await;
        streams.create_stream_with_id("streamB", "streamB", "c-1", 1).await;
        let pipeline = MessagePipeline::new(
            SecretResolver::new(InMemorySecretStore::shared(), None),
            Dispatcher::new(&HttpConfig::default()).unwrap(),
            Router::new(streams.clone()),
        );
        (ReplayDriver::new(streams.clone(), pipeline), streams)
    }

    #[tokio::test]
    async fn test_empty_read_has_no_last_offset() {
        let (driver, _) = setup().await;
        let report = driver
            .replay(&ReplayCursor::new("source", "0", 0), &TablePolicy::default(), 10)
            .await
            .unwrap();

        assert_eq!(report.last_offset, None);
        assert_eq!(report.last_offset_or_zero(), 0);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_unknown_stream_is_an_error() {
        let (driver, _) = setup().await;
        let result = driver
            .replay(&ReplayCursor::new("missing", "0", 0), &TablePolicy::default(), 10)
            .await;

        assert!(matches!(result, Err(RelayError::Stream(_))));
    }

    #[tokio::test]
    async fn test_zero_batch_is_rejected() {
        let (driver, _) = setup().await;
        let result = driver
            .replay(&ReplayCursor::new("source", "0", 0), &TablePolicy::default(), 0)
            .await;

        assert!(matches!(result, Err(RelayError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_batch_is_bounded() {
        let (driver, streams) = setup().await;
        for _ in 0..4 {
            streams.put_message("source", b"k", b"{}").await.unwrap();
        }
        let policy = TablePolicy::default().with_malformed_handling(MalformedHandling::Drop);

        let report = driver
            .replay(&ReplayCursor::new("source", "0", 1), &policy, 2)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.last_offset, Some(2));
        assert_eq!(report.discarded, 2);
    }

    #[tokio::test]
    async fn test_unkeyed_message_is_routed_with_empty_key() {
        let (driver, streams) = setup().await;
        streams.put_message("source", b"", b"not json").await.unwrap();
        let policy = TablePolicy::from_entries([("unmapped", "streamB")]);

        let report = driver
            .replay(&ReplayCursor::new("source", "0", 0), &policy, 10)
            .await
            .unwrap();

        assert_eq!(report.dead_lettered, 1);
        let stored = streams.messages("streamB").await;
        assert_eq!(stored[0].key, None);
        assert_eq!(stored[0].value, b"not json".to_vec());
    }

    #[tokio::test]
    async fn test_failed_write_is_recorded_and_batch_continues() {
        let (driver, streams) = setup().await;
        streams.put_message("source", b"a", b"x").await.unwrap();
        streams.put_message("source", b"b", b"y").await.unwrap();
        let policy = TablePolicy::from_entries([("unmapped", "nowhere")]);

        let report = driver
            .replay(&ReplayCursor::new("source", "0", 0), &policy, 10)
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.last_offset, Some(1));
    }
}
