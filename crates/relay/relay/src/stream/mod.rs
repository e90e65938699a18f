//! Stream service seam.
//!
//! The relay reads from and appends to a partitioned, offset-addressed log
//! through [`StreamService`]. The service itself lives outside this crate;
//! [`InMemoryStreamService`] backs tests and local runs.

mod memory;
mod trait_def;

pub use memory::InMemoryStreamService;
pub use trait_def::{
    CursorToken, LifecycleState, PutAck, StreamMessage, StreamQuery, StreamService, StreamSummary,
};
