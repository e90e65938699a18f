use super::trait_def::*;
use crate::error::{RelayError, RelayResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::RwLock;

struct InMemoryStream {
    summary: StreamSummary,
    partitions: Vec<Vec<StreamMessage>>,
}

struct CursorPosition {
    stream_id: String,
    partition: usize,
    offset: u64,
}

/// In-memory implementation of StreamService
///
/// Partitions are named `"0"`, `"1"`, ... and offsets start at 0 in each.
/// Keyed messages are placed by key hash; unkeyed messages go to partition 0.
/// A cursor serves one read and is then discarded.
pub struct InMemoryStreamService {
    streams: Arc<RwLock<HashMap<String, InMemoryStream>>>,
    cursors: Arc<RwLock<HashMap<String, CursorPosition>>>,
}

impl InMemoryStreamService {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            cursors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates an active stream with a generated ID and returns the ID.
    pub async fn create_stream(
        &self,
        name: impl Into<String>,
        compartment_id: impl Into<String>,
        partitions: u32,
    ) -> String {
        let id = format!("stream-{}", uuid::Uuid::new_v4());
        self.create_stream_with_id(id.clone(), name, compartment_id, partitions)
            .await;
        id
    }

    /// Creates (or replaces) an active stream with a caller-chosen ID.
    pub async fn create_stream_with_id(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        compartment_id: impl Into<String>,
        partitions: u32,
    ) {
        let partitions = partitions.max(1);
        let summary = StreamSummary {
            id: id.into(),
            name: name.into(),
            compartment_id: compartment_id.into(),
            lifecycle_state: LifecycleState::Active,
            partitions,
        };

        let mut streams = self.streams.write().await;
        streams.insert(
            summary.id.clone(),
            InMemoryStream {
                summary,
                partitions: vec![Vec::new(); partitions as usize],
            },
        );
    }

    /// Changes a stream's lifecycle state.
    pub async fn set_lifecycle_state(&self, stream_id: &str, state: LifecycleState) -> RelayResult<()> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_id)
            .ok_or_else(|| not_found(stream_id))?;
        stream.summary.lifecycle_state = state;
        Ok(())
    }

    /// Returns every message in a stream, partition by partition.
    pub async fn messages(&self, stream_id: &str) -> Vec<StreamMessage> {
        let streams = self.streams.read().await;
        streams
            .get(stream_id)
            .map(|s| s.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    fn partition_for(key: &[u8], partitions: usize) -> usize {
        if key.is_empty() || partitions <= 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partitions as u64) as usize
    }
}

impl Default for InMemoryStreamService {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(stream_id: &str) -> RelayError {
    RelayError::Stream(format!("stream {} not found", stream_id))
}

fn parse_partition(stream: &InMemoryStream, partition: &str) -> RelayResult<usize> {
    partition
        .parse::<usize>()
        .ok()
        .filter(|p| *p < stream.partitions.len())
        .ok_or_else(|| {
            RelayError::Stream(format!(
                "partition {} does not exist in stream {}",
                partition, stream.summary.id
            ))
        })
}

#[async_trait]
impl StreamService for InMemoryStreamService {
    async fn list_streams(&self, query: &StreamQuery) -> RelayResult<Vec<StreamSummary>> {
        let streams = self.streams.read().await;
        Ok(streams
            .values()
            .map(|s| &s.summary)
            .filter(|s| query.matches(s))
            .cloned()
            .collect())
    }

    async fn get_stream(&self, stream_id: &str) -> RelayResult<StreamSummary> {
        let streams = self.streams.read().await;
        streams
            .get(stream_id)
            .map(|s| s.summary.clone())
            .ok_or_else(|| not_found(stream_id))
    }

    async fn put_message(&self, stream_id: &str, key: &[u8], value: &[u8]) -> RelayResult<PutAck> {
        let mut streams = self.streams.write().await;
        let stream = streams
            .get_mut(stream_id)
            .ok_or_else(|| not_found(stream_id))?;

        if stream.summary.lifecycle_state != LifecycleState::Active {
            return Err(RelayError::Stream(format!(
                "stream {} is {:?}",
                stream_id, stream.summary.lifecycle_state
            )));
        }

        let partition = Self::partition_for(key, stream.partitions.len());
        let messages = &mut stream.partitions[partition];
        let offset = messages.len() as u64;

        messages.push(StreamMessage {
            key: (!key.is_empty()).then(|| key.to_vec()),
            value: value.to_vec(),
            offset,
            partition: partition.to_string(),
            timestamp: Utc::now(),
        });

        Ok(PutAck {
            partition: partition.to_string(),
            offset,
        })
    }

    async fn create_cursor(
        &self,
        stream_id: &str,
        partition: &str,
        offset: u64,
    ) -> RelayResult<CursorToken> {
        let streams = self.streams.read().await;
        let stream = streams.get(stream_id).ok_or_else(|| not_found(stream_id))?;
        let partition = parse_partition(stream, partition)?;
        drop(streams);

        let token = uuid::Uuid::new_v4().to_string();
        let mut cursors = self.cursors.write().await;
        cursors.insert(
            token.clone(),
            CursorPosition {
                stream_id: stream_id.to_string(),
                partition,
                offset,
            },
        );

        Ok(CursorToken(token))
    }

    async fn get_messages(
        &self,
        stream_id: &str,
        cursor: &CursorToken,
        limit: usize,
    ) -> RelayResult<Vec<StreamMessage>> {
        // Cursors are single-use: a successful lookup consumes the token.
        let mut cursors = self.cursors.write().await;
        match cursors.get(&cursor.0) {
            None => {
                return Err(RelayError::Stream(format!("cursor {} is not valid", cursor)));
            }
            Some(position) if position.stream_id != stream_id => {
                return Err(RelayError::Stream(format!(
                    "cursor {} does not belong to stream {}",
                    cursor, stream_id
                )));
            }
            Some(_) => {}
        }
        let position = cursors
            .remove(&cursor.0)
            .ok_or_else(|| RelayError::Internal(format!("cursor {} vanished", cursor)))?;
        drop(cursors);

        let streams = self.streams.read().await;
        let stream = streams.get(stream_id).ok_or_else(|| not_found(stream_id))?;

        Ok(stream.partitions[position.partition]
            .iter()
            .filter(|m| m.offset >= position.offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
