use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RelayResult;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Creating,
    Active,
    Updating,
    Deleting,
    Deleted,
    Failed,
}

/// Stream metadata as returned by the stream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    /// Stream identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Compartment the stream belongs to.
    pub compartment_id: String,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Number of partitions.
    pub partitions: u32,
}

/// Filter for [`StreamService::list_streams`].
#[derive(Debug, Clone, Default)]
pub struct StreamQuery {
    /// Compartment to search.
    pub compartment_id: String,
    /// Restrict to one stream ID.
    pub id: Option<String>,
    /// Restrict to one lifecycle state.
    pub lifecycle_state: Option<LifecycleState>,
}

impl StreamQuery {
    /// Query for one active stream in a compartment.
    pub fn active(compartment_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            compartment_id: compartment_id.into(),
            id: Some(id.into()),
            lifecycle_state: Some(LifecycleState::Active),
        }
    }

    /// Whether a stream satisfies this query.
    pub fn matches(&self, stream: &StreamSummary) -> bool {
        if stream.compartment_id != self.compartment_id {
            return false;
        }
        if let Some(ref id) = self.id {
            if &stream.id != id {
                return false;
            }
        }
        if let Some(state) = self.lifecycle_state {
            if stream.lifecycle_state != state {
                return false;
            }
        }
        true
    }
}

/// One message read from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Message key; `None` when the producer sent no key.
    pub key: Option<Vec<u8>>,
    /// Message value.
    pub value: Vec<u8>,
    /// Offset within the partition.
    pub offset: u64,
    /// Partition the message was read from.
    pub partition: String,
    /// When the message was appended.
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement of an appended message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAck {
    /// Partition the message landed in.
    pub partition: String,
    /// Offset assigned to the message.
    pub offset: u64,
}

/// Opaque token positioning a read within a stream partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorToken(pub String);

impl fmt::Display for CursorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for the partitioned, offset-addressed log service.
#[async_trait]
pub trait StreamService: Send + Sync {
    /// Lists streams matching a query.
    async fn list_streams(&self, query: &StreamQuery) -> RelayResult<Vec<StreamSummary>>;

    /// Gets a stream by ID.
    async fn get_stream(&self, stream_id: &str) -> RelayResult<StreamSummary>;

    /// Appends one message.
    async fn put_message(&self, stream_id: &str, key: &[u8], value: &[u8]) -> RelayResult<PutAck>;

    /// Creates a cursor positioned at `offset` (inclusive) in `partition`.
    async fn create_cursor(
        &self,
        stream_id: &str,
        partition: &str,
        offset: u64,
    ) -> RelayResult<CursorToken>;

    /// Reads up to `limit` messages from a cursor.
    async fn get_messages(
        &self,
        stream_id: &str,
        cursor: &CursorToken,
        limit: usize,
    ) -> RelayResult<Vec<StreamMessage>>;
}
