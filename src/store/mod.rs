//! Storage abstraction
//!
//! The chat service and fan-out broker only ever touch persistent state
//! through the narrow [`Store`] trait: set membership, hash fields, an
//! append-only list, key deletion, and a topic-keyed publish/subscribe
//! primitive. Any Redis-shaped backend can implement it; the in-process
//! [`MemoryStore`] is the default backend and the one the tests run against.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// A key already holds a value of a different kind
    #[error("key '{0}' holds a value of the wrong type")]
    WrongType(String),

    /// Backend-specific failure (connection loss, I/O, ...)
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Live subscription to one topic.
///
/// Dropping the subscription is the unsubscribe: the backend sees the
/// receiver go away and stops routing events to it.
pub struct TopicSubscription {
    rx: broadcast::Receiver<Bytes>,
}

impl TopicSubscription {
    /// Wrap a broadcast receiver fed by the backend
    pub fn new(rx: broadcast::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Wait for the next event on the topic.
    ///
    /// Returns `None` once the backend drops the topic. A lagged receiver
    /// skips the missed events and keeps going; delivery is at-least-once
    /// best effort, never replayed.
    pub async fn next(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "topic subscription lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl std::fmt::Debug for TopicSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicSubscription").finish_non_exhaustive()
    }
}

/// Narrow persistent-store contract the chat system is written against
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether `member` is in the set at `key`
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Add `member` to the set at `key` (idempotent)
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove `member` from the set at `key` (no-op when absent)
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Set one field of the hash at `key`
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Append `value` to the end of the list at `key`
    async fn list_append(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Last `count` list elements, oldest first; empty for a missing key
    async fn list_tail(&self, key: &str, count: usize) -> Result<Vec<Bytes>, StoreError>;

    /// Delete the given keys outright (missing keys are ignored)
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Publish `payload` to every current subscriber of `topic`
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), StoreError>;

    /// Open a subscription to `topic`
    async fn subscribe(&self, topic: &str) -> Result<TopicSubscription, StoreError>;
}
