//! Relay entry points: wire request parsing and the assembled relay.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, RelayResult};
use crate::ingest::{InboundMessage, IngestSummary, LiveIngestionDriver};
use crate::pipeline::MessagePipeline;
use crate::replay::{ReplayCursor, ReplayDriver, ReplayReport};
use crate::routing::{MalformedHandling, Router, TablePolicy};
use crate::secret::{SecretResolver, SecretStore};
use crate::stream::StreamService;

/// Body returned by a successful ingestion call.
pub const SUCCESS_BODY: &str = "success";
/// Body returned by a failed ingestion call.
pub const FAILED_BODY: &str = "failed";

/// One entry of a live-ingestion request.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestEntry {
    /// Message key, passed through unchanged.
    #[serde(default)]
    pub key: Option<String>,
    /// Base64-encoded envelope.
    pub value: String,
}

impl IngestEntry {
    /// Decodes the entry. An undecodable value is kept raw and marked.
    pub fn into_message(self) -> InboundMessage {
        let key = self.key.unwrap_or_default().into_bytes();
        match STANDARD.decode(self.value.as_bytes()) {
            Ok(value) => InboundMessage::new(key, value),
            Err(e) => InboundMessage::undecodable(key, self.value.into_bytes(), format!("value is not base64: {}", e)),
        }
    }
}

/// One row of a replay request's routing table.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMapping {
    /// Status code (string or number) or `"unmapped"`.
    pub responsecode: Value,
    /// Destination stream.
    pub stream: String,
}

/// A replay request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    /// Stream to replay from (`streamOCIDToRetry`). Required.
    #[serde(rename = "streamOCIDToRetry")]
    pub stream_id: Option<String>,
    /// First offset to read, inclusive. Defaults to 0; negative is invalid.
    #[serde(default)]
    pub read_offset: i64,
    /// Partition to read from. Required.
    pub read_partition: Option<String>,
    /// Status-to-stream routing table (`errormapping`). Required, may be empty.
    #[serde(rename = "errormapping")]
    pub error_mapping: Option<Vec<ErrorMapping>>,
    /// Messages to read; the configured replay batch when absent.
    pub max_batch: Option<usize>,
    /// Handling of malformed envelopes; routes to `unmapped` when absent.
    pub malformed_handling: Option<MalformedHandling>,
}

impl ReplayRequest {
    /// Parses a replay request body.
    pub fn parse(body: &str) -> RelayResult<Self> {
        serde_json::from_str(body).map_err(|e| RelayError::InvalidRequest(e.to_string()))
    }

    /// Validates the request and splits it into a cursor and a routing policy.
    pub fn into_parts(self) -> RelayResult<(ReplayCursor, TablePolicy, Option<usize>)> {
        let missing = |field: &str| RelayError::InvalidRequest(format!("{} is required", field));

        let stream_id = self
            .stream_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("streamOCIDToRetry"))?;
        let partition = self
            .read_partition
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("readPartition"))?;
        let mapping = self.error_mapping.ok_or_else(|| missing("errormapping"))?;
        let offset = u64::try_from(self.read_offset).map_err(|_| {
            RelayError::InvalidRequest(format!("readOffset {} is negative", self.read_offset))
        })?;

        let mut table = HashMap::new();
        for row in mapping {
            let code = match row.responsecode {
                Value::String(code) => code,
                Value::Number(code) => code.to_string(),
                other => {
                    return Err(RelayError::InvalidRequest(format!(
                        "responsecode {} is not a string or number",
                        other
                    )));
                }
            };
            table.insert(code, row.stream);
        }

        let policy =
            TablePolicy::new(table).with_malformed_handling(self.malformed_handling.unwrap_or_default());

        Ok((ReplayCursor::new(stream_id, partition, offset), policy, self.max_batch))
    }
}

/// Status and body returned to the caller of an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResponse {
    /// HTTP-style status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl HandlerResponse {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

fn status_for(err: &RelayError) -> u16 {
    match err {
        RelayError::InvalidRequest(_) => 400,
        _ => 500,
    }
}

/// The assembled relay: live ingestion and replay over shared collaborators.
#[derive(Clone)]
pub struct RelayHandler {
    ingest: LiveIngestionDriver,
    replay: ReplayDriver,
    max_batch: usize,
}

impl RelayHandler {
    /// Wires the relay from a validated configuration and its collaborators.
    pub fn new(
        config: &RelayConfig,
        streams: Arc<dyn StreamService>,
        secrets: Arc<dyn SecretStore>,
    ) -> RelayResult<Self> {
        config.validate()?;

        let pipeline = MessagePipeline::new(
            SecretResolver::new(secrets, config.vault_id.clone()),
            Dispatcher::new(&config.http)?,
            Router::new(streams.clone()),
        );

        Ok(Self {
            ingest: LiveIngestionDriver::new(config, streams.clone(), pipeline.clone()),
            replay: ReplayDriver::new(streams, pipeline),
            max_batch: config.replay.max_batch,
        })
    }

    /// Runs a live-ingestion request body.
    pub async fn ingest(&self, body: &str) -> RelayResult<IngestSummary> {
        let entries: Vec<IngestEntry> = serde_json::from_str(body)
            .map_err(|e| RelayError::InvalidRequest(format!("ingestion body: {}", e)))?;
        let messages = entries.into_iter().map(IngestEntry::into_message).collect();
        self.ingest.ingest(messages).await
    }

    /// Live-ingestion entry point: `200 success` or `500 failed`.
    pub async fn handle_ingest(&self, body: &str) -> HandlerResponse {
        match self.ingest(body).await {
            Ok(_) => HandlerResponse::new(200, SUCCESS_BODY),
            Err(e) => {
                tracing::error!("Ingestion failed: {}", e);
                HandlerResponse::new(500, FAILED_BODY)
            }
        }
    }

    /// Runs a replay request body.
    pub async fn replay(&self, body: &str) -> RelayResult<ReplayReport> {
        let (cursor, policy, max_batch) = ReplayRequest::parse(body)?.into_parts()?;
        self.replay
            .replay(&cursor, &policy, max_batch.unwrap_or(self.max_batch))
            .await
    }

    /// Replay entry point: the last offset read as the body, `0` when nothing was read.
    pub async fn handle_replay(&self, body: &str) -> HandlerResponse {
        match self.replay(body).await {
            Ok(report) => HandlerResponse::new(200, report.last_offset_or_zero().to_string()),
            Err(e) => {
                tracing::error!("Replay failed: {}", e);
                HandlerResponse::new(status_for(&e), e.to_string())
            }
        }
    }
}
