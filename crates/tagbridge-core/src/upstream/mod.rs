//! Upstream connector interface and backends.
//!
//! The upstream side is the industrial controller. The engine treats it as an
//! abstract tag-read/tag-write capability; the physical wire protocol lives in
//! the implementation behind this trait.

pub mod memory;

pub use self::memory::MemoryUpstream;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::record::TagValue;

/// Named-value access to the controller.
///
/// Implementations own the physical connection and must serialize concurrent
/// calls internally: the handshake loop and the heartbeat loop share one
/// upstream, and a heartbeat write must never interleave mid-operation with a
/// handshake read/write on the same session. Every call is expected to apply
/// a bounded I/O timeout and to surface a timeout exactly like a connection
/// failure, as [`EngineError::UpstreamIo`].
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Establish the controller session.
    async fn connect(&self) -> Result<(), EngineError>;

    /// Close the controller session.
    async fn disconnect(&self);

    /// Whether the session is currently believed reachable.
    async fn is_connected(&self) -> bool;

    /// Read a single named value.
    async fn read_value(&self, tag: &str) -> Result<TagValue, EngineError>;

    /// Read a structured tag as a field-to-value mapping.
    async fn read_structured(&self, tag: &str)
    -> Result<BTreeMap<String, TagValue>, EngineError>;

    /// Write a single named value.
    async fn write_value(&self, tag: &str, value: TagValue) -> Result<(), EngineError>;
}
