//! In-process store backend
//!
//! Keeps sets, hashes, and lists in a single keyed map guarded by an async
//! `RwLock`, and routes topic publishes through per-topic broadcast channels.
//! Suitable as the default single-process backend and as the test double for
//! anything written against the [`Store`] trait.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};

use super::{Store, StoreError, TopicSubscription};

const DEFAULT_TOPIC_CAPACITY: usize = 256;

/// One typed value slot in the keyed map
enum Value {
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
    List(Vec<Bytes>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
        }
    }
}

/// In-memory implementation of [`Store`]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
    topics: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
    topic_capacity: usize,
}

impl MemoryStore {
    /// Create a store with the default per-topic channel capacity
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
        }
    }

    /// Set the buffer size of each topic's broadcast channel.
    ///
    /// Subscribers further behind than this many events get skipped ahead
    /// (at-least-once, best effort).
    pub fn with_topic_capacity(mut self, capacity: usize) -> Self {
        self.topic_capacity = capacity.max(1);
        self
    }

    /// Number of topics with at least one live subscriber
    pub async fn open_topics(&self) -> usize {
        let topics = self.topics.read().await;
        topics.values().filter(|tx| tx.receiver_count() > 0).count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str, value: &Value) -> StoreError {
    tracing::error!(key, kind = value.kind(), "key holds wrong value kind");
    StoreError::WrongType(key.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(other) => Err(wrong_type(key, other)),
            None => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        match data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()))
        {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(Value::Set(set)) => {
                set.remove(member);
                Ok(())
            }
            Some(other) => Err(wrong_type(key, other)),
            None => Ok(()),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        match data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(hash) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    async fn list_append(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        match data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(Vec::new()))
        {
            Value::List(list) => {
                list.push(value);
                Ok(())
            }
            other => Err(wrong_type(key, other)),
        }
    }

    async fn list_tail(&self, key: &str, count: usize) -> Result<Vec<Bytes>, StoreError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(Value::List(list)) => {
                let start = list.len().saturating_sub(count);
                Ok(list[start..].to_vec())
            }
            Some(other) => Err(wrong_type(key, other)),
            None => Ok(Vec::new()),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), StoreError> {
        let mut topics = self.topics.write().await;
        if let Some(tx) = topics.get(topic) {
            if tx.receiver_count() == 0 {
                // Last subscriber is gone; drop the channel.
                topics.remove(topic);
            } else {
                // send() only errors when there are no receivers.
                let _ = tx.send(payload);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<TopicSubscription, StoreError> {
        let mut topics = self.topics.write().await;
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.topic_capacity).0);
        Ok(TopicSubscription::new(tx.subscribe()))
    }
}
