//! # Stream Relay
//!
//! Relays REST calls described by messages on a stream and routes failures to
//! dead-letter streams:
//! - Envelope parsing and credential resolution
//! - One-shot HTTP dispatch with ordered headers
//! - Fixed-category and table-driven failure routing
//! - Live ingestion with dead-letter prerequisite checks
//! - Bounded replay from a dead-letter stream
//!
//! ## Example
//!
//! ```rust,ignore
//! use stream_relay::{DeadLetterStreams, InMemorySecretStore, InMemoryStreamService, RelayConfig, RelayHandler};
//! use std::sync::Arc;
//!
//! let config = RelayConfig::new(
//!     DeadLetterStreams::new("dlq-400", "dlq-503", "dlq-500", "dlq-default"),
//!     "compartment-1",
//! );
//! let relay = RelayHandler::new(
//!     &config,
//!     Arc::new(InMemoryStreamService::new()),
//!     InMemorySecretStore::shared(),
//! )?;
//!
//! let response = relay.handle_ingest(r#"[{"key":"k1","value":"e30="}]"#).await;
//! ```

mod config;
mod dispatch;
mod envelope;
mod error;
mod handler;
mod ingest;
mod pipeline;
mod replay;
mod routing;
mod secret;
pub mod stream;

pub use config::{
    DEFAULT_REPLAY_BATCH, DeadLetterStreams, ENV_COMPARTMENT, ENV_DEFAULT_STREAM, ENV_INTERNAL_ERROR_STREAM,
    ENV_SERVICE_UNAVAILABLE_STREAM, ENV_UNRECOVERABLE_STREAM, ENV_VAULT, HttpConfig, RelayConfig, ReplaySettings,
};
pub use dispatch::{AUTHORIZATION_HEADER, Dispatcher, RelayOutcome, RequestPlan};
pub use envelope::{Envelope, Header, Operation, SecretRef};
pub use error::{RelayError, RelayResult};
pub use handler::{
    ErrorMapping, FAILED_BODY, HandlerResponse, IngestEntry, RelayHandler, ReplayRequest, SUCCESS_BODY,
};
pub use ingest::{InboundMessage, IngestSummary, LiveIngestionDriver, MessageError};
pub use pipeline::{MessagePipeline, MessageReport};
pub use replay::{ReplayCursor, ReplayDriver, ReplayFailure, ReplayReport};
pub use routing::{
    ClassificationPolicy, DeadLetterEntry, FixedCategoryPolicy, MalformedHandling, RouteReceipt, Router,
    RoutingDecision, TablePolicy, UNMAPPED_KEY,
};
pub use secret::{InMemorySecretStore, SecretResolver, SecretStore};
pub use stream::{InMemoryStreamService, StreamService};
