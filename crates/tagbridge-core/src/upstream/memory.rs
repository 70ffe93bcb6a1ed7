//! In-memory upstream backend.
//!
//! A controller stand-in holding a plain tag table behind a mutex, with
//! injectable failure switches. Used by the test suite and by embedders that
//! need to run the engine without hardware.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::record::TagValue;

use super::Upstream;

#[derive(Default)]
struct Inner {
    connected: bool,
    tags: BTreeMap<String, TagValue>,
    structured: BTreeMap<String, BTreeMap<String, TagValue>>,
    fail_connect: bool,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory tag table implementing [`Upstream`].
///
/// The mutex doubles as the serialization boundary the trait contract
/// requires.
#[derive(Default)]
pub struct MemoryUpstream {
    inner: Mutex<Inner>,
}

impl MemoryUpstream {
    /// New disconnected upstream with an empty tag table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single tag value.
    pub async fn set_value(&self, tag: &str, value: impl Into<TagValue>) {
        self.inner.lock().await.tags.insert(tag.to_string(), value.into());
    }

    /// Set a structured tag payload.
    pub async fn set_structured(&self, tag: &str, fields: BTreeMap<String, TagValue>) {
        self.inner.lock().await.structured.insert(tag.to_string(), fields);
    }

    /// Current value of a tag, if set.
    pub async fn value(&self, tag: &str) -> Option<TagValue> {
        self.inner.lock().await.tags.get(tag).cloned()
    }

    /// Make `connect` fail until cleared.
    pub async fn fail_connect(&self, fail: bool) {
        self.inner.lock().await.fail_connect = fail;
    }

    /// Make reads fail until cleared. A failing read also drops the session,
    /// like a real transport would.
    pub async fn fail_reads(&self, fail: bool) {
        self.inner.lock().await.fail_reads = fail;
    }

    /// Make writes fail until cleared.
    pub async fn fail_writes(&self, fail: bool) {
        self.inner.lock().await.fail_writes = fail;
    }
}

#[async_trait]
impl Upstream for MemoryUpstream {
    async fn connect(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_connect {
            return Err(EngineError::UpstreamIo {
                operation: "connect".to_string(),
                details: "connection refused".to_string(),
            });
        }
        inner.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.lock().await.connected = false;
    }

    async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    async fn read_value(&self, tag: &str) -> Result<TagValue, EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_reads {
            inner.connected = false;
            return Err(EngineError::UpstreamIo {
                operation: format!("read {}", tag),
                details: "simulated read failure".to_string(),
            });
        }
        inner
            .tags
            .get(tag)
            .cloned()
            .ok_or_else(|| EngineError::UpstreamIo {
                operation: format!("read {}", tag),
                details: "no such tag".to_string(),
            })
    }

    async fn read_structured(
        &self,
        tag: &str,
    ) -> Result<BTreeMap<String, TagValue>, EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_reads {
            inner.connected = false;
            return Err(EngineError::UpstreamIo {
                operation: format!("read {}", tag),
                details: "simulated read failure".to_string(),
            });
        }
        inner
            .structured
            .get(tag)
            .cloned()
            .ok_or_else(|| EngineError::UpstreamIo {
                operation: format!("read {}", tag),
                details: "no such structured tag".to_string(),
            })
    }

    async fn write_value(&self, tag: &str, value: TagValue) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_writes {
            inner.connected = false;
            return Err(EngineError::UpstreamIo {
                operation: format!("write {}", tag),
                details: "simulated write failure".to_string(),
            });
        }
        inner.tags.insert(tag.to_string(), value);
        Ok(())
    }
}
