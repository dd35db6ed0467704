//! Fan-out broker implementation
//!
//! The broker bridges one upstream topic subscription per room to all of that
//! room's live subscriber handles. Room state lives in a sharded map, so
//! subscribe/unsubscribe on different rooms never contend; transitions for a
//! single room (first subscribe creates the listener, last unsubscribe tears
//! it down) are serialized by the map's per-key entry operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::ChatError;
use crate::keys::RoomKeys;
use crate::store::{Store, TopicSubscription};

use super::handle::{DeliveryFn, SubscriberHandle};
use super::room::RoomFanout;

/// Routes each room's published events to its live subscribers
///
/// Invariant: a room has an entry in `rooms` (and with it exactly one
/// upstream listener task) if and only if it has at least one open handle.
/// Shared process-wide as `Arc<FanoutBroker>`.
pub struct FanoutBroker {
    store: Arc<dyn Store>,
    rooms: DashMap<String, RoomFanout>,
    next_handle_id: AtomicU64,
}

impl FanoutBroker {
    /// Create a broker on top of a store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            rooms: DashMap::new(),
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Open a live subscription to a room.
    ///
    /// Fails with `RoomNotFound` when the room is not registered. The caller
    /// owns the connection lifecycle and must call [`unsubscribe`] once the
    /// underlying connection completes, times out, or errors.
    ///
    /// [`unsubscribe`]: FanoutBroker::unsubscribe
    pub async fn subscribe(
        self: &Arc<Self>,
        room_id: &str,
        deliver: DeliveryFn,
    ) -> Result<Arc<SubscriberHandle>, ChatError> {
        let keys = RoomKeys::new(room_id);
        if !self
            .store
            .set_contains(RoomKeys::rooms_set(), room_id)
            .await?
        {
            return Err(ChatError::RoomNotFound(room_id.to_string()));
        }

        // Open the upstream subscription before touching the room map so no
        // map guard is held across an await. If the room already has a
        // listener the spare subscription is simply dropped.
        let subscription = self.store.subscribe(&keys.channel()).await?;

        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(SubscriberHandle::new(id, room_id.to_string(), deliver));

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().handles.insert(id, Arc::clone(&handle));
                tracing::info!(
                    room = %room_id,
                    handle = id,
                    subscribers = entry.get().handles.len(),
                    "Subscriber added"
                );
            }
            Entry::Vacant(entry) => {
                let listener = self.spawn_listener(room_id.to_string(), subscription);
                entry.insert(RoomFanout::new(Arc::clone(&handle), listener));
                tracing::info!(
                    room = %room_id,
                    handle = id,
                    "Subscriber added, upstream listener registered"
                );
            }
        }

        Ok(handle)
    }

    /// Publish a raw payload on a room's event topic.
    ///
    /// Store errors propagate; whether downstream deliveries succeed is
    /// invisible to the publisher.
    pub async fn publish(&self, room_id: &str, payload: Bytes) -> Result<(), ChatError> {
        let keys = RoomKeys::new(room_id);
        self.store.publish(&keys.channel(), payload).await?;
        Ok(())
    }

    /// Remove a handle from its room. Idempotent: every cancellation path
    /// (remote disconnect, timeout, local error, failed delivery) funnels
    /// here, and repeat calls are safe.
    ///
    /// Removing the last handle tears the room's fan-out state down and
    /// deregisters the upstream listener.
    pub fn unsubscribe(&self, room_id: &str, handle: &SubscriberHandle) {
        handle.close();

        let now_empty = match self.rooms.get_mut(room_id) {
            Some(mut entry) => {
                entry.handles.remove(&handle.id());
                entry.handles.is_empty()
            }
            None => return,
        };

        if now_empty {
            // Re-checked under the entry lock: a racing subscribe that got a
            // handle in first keeps the room alive.
            if let Some((_, fanout)) = self.rooms.remove_if(room_id, |_, f| f.handles.is_empty()) {
                fanout.shutdown();
                tracing::info!(room = %room_id, "Last subscriber left, upstream listener removed");
                return;
            }
        }
        tracing::debug!(room = %room_id, handle = handle.id(), "Subscriber removed");
    }

    /// Whether a room currently has live fan-out state
    pub fn is_active(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of open handles for a room (0 when inactive)
    pub fn handle_count(&self, room_id: &str) -> usize {
        self.rooms
            .get(room_id)
            .map(|entry| entry.handles.len())
            .unwrap_or(0)
    }

    /// Number of rooms with live fan-out state
    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Spawn the single upstream listener task for a room
    fn spawn_listener(
        self: &Arc<Self>,
        room_id: String,
        mut subscription: TopicSubscription,
    ) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(payload) = subscription.next().await {
                broker.dispatch(&room_id, payload);
            }
            tracing::debug!(room = %room_id, "Upstream topic closed");
        })
    }

    /// Deliver one upstream event to every live handle of a room.
    ///
    /// Iterates a snapshot so concurrent subscribe/unsubscribe neither races
    /// with the iteration nor gets skipped. A handle whose delivery fails is
    /// removed as if it had unsubscribed; nobody else sees the failure.
    fn dispatch(&self, room_id: &str, payload: Bytes) {
        let snapshot = match self.rooms.get(room_id) {
            Some(entry) => entry.snapshot(),
            None => return,
        };

        for handle in &snapshot {
            if handle.deliver(payload.clone()).is_err() {
                tracing::debug!(
                    room = %room_id,
                    handle = handle.id(),
                    "Delivery failed, dropping subscriber"
                );
                self.unsubscribe(room_id, handle);
            }
        }
    }
}

impl std::fmt::Debug for FanoutBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutBroker")
            .field("active_rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::broker::handle::DeliveryError;
    use crate::store::MemoryStore;

    const RECV_WAIT: Duration = Duration::from_millis(500);

    async fn broker_with_room(room: &str) -> (Arc<MemoryStore>, Arc<FanoutBroker>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        store.set_add(RoomKeys::rooms_set(), room).await.unwrap();
        let broker = Arc::new(FanoutBroker::new(store.clone() as Arc<dyn Store>));
        (store, broker)
    }

    fn channel_delivery() -> (DeliveryFn, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let deliver: DeliveryFn = Box::new(move |payload| tx.send(payload).map_err(|_| DeliveryError));
        (deliver, rx)
    }

    fn failing_delivery() -> DeliveryFn {
        Box::new(|_| Err(DeliveryError))
    }

    #[tokio::test]
    async fn test_subscribe_unknown_room_fails() {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(FanoutBroker::new(store as Arc<dyn Store>));

        let result = broker.subscribe("nowhere", Box::new(|_| Ok(()))).await;
        assert!(matches!(result, Err(ChatError::RoomNotFound(_))));
        assert_eq!(broker.active_rooms(), 0);
    }

    #[tokio::test]
    async fn test_published_event_reaches_subscriber() {
        let (_store, broker) = broker_with_room("general").await;
        let (deliver, mut rx) = channel_delivery();
        let handle = broker.subscribe("general", deliver).await.unwrap();

        broker
            .publish("general", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let payload = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"hello"));

        // Exactly once: no second copy shows up.
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        broker.unsubscribe("general", &handle);
    }

    #[tokio::test]
    async fn test_single_upstream_listener_for_many_subscribers() {
        let (_store, broker) = broker_with_room("general").await;
        let (deliver_a, mut rx_a) = channel_delivery();
        let (deliver_b, mut rx_b) = channel_delivery();
        broker.subscribe("general", deliver_a).await.unwrap();
        broker.subscribe("general", deliver_b).await.unwrap();

        assert_eq!(broker.handle_count("general"), 2);
        assert_eq!(broker.active_rooms(), 1);

        broker
            .publish("general", Bytes::from_static(b"once"))
            .await
            .unwrap();

        // Each subscriber gets the event exactly once; a duplicate upstream
        // listener would double-deliver.
        for rx in [&mut rx_a, &mut rx_b] {
            let payload = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(payload, Bytes::from_static(b"once"));
            assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_fanout_state_tracks_handle_set() {
        let (_store, broker) = broker_with_room("general").await;
        assert!(!broker.is_active("general"));

        let first = broker.subscribe("general", Box::new(|_| Ok(()))).await.unwrap();
        assert!(broker.is_active("general"));

        let second = broker.subscribe("general", Box::new(|_| Ok(()))).await.unwrap();
        broker.unsubscribe("general", &first);
        assert!(broker.is_active("general"));
        assert_eq!(broker.handle_count("general"), 1);

        broker.unsubscribe("general", &second);
        assert!(!broker.is_active("general"));
        assert_eq!(broker.active_rooms(), 0);

        // Teardown and re-creation are symmetric.
        let third = broker.subscribe("general", Box::new(|_| Ok(()))).await.unwrap();
        assert!(broker.is_active("general"));
        broker.unsubscribe("general", &third);
        assert!(!broker.is_active("general"));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (_store, broker) = broker_with_room("general").await;
        let handle = broker.subscribe("general", Box::new(|_| Ok(()))).await.unwrap();

        broker.unsubscribe("general", &handle);
        broker.unsubscribe("general", &handle);
        broker.unsubscribe("general", &handle);

        assert!(!broker.is_active("general"));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_failed_delivery_drops_only_that_handle() {
        let (_store, broker) = broker_with_room("general").await;
        broker.subscribe("general", failing_delivery()).await.unwrap();
        let (deliver, mut rx) = channel_delivery();
        broker.subscribe("general", deliver).await.unwrap();

        broker
            .publish("general", Bytes::from_static(b"first"))
            .await
            .unwrap();
        let payload = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"first"));

        // The dead subscriber is removed as a side effect of the failed
        // delivery (possibly just after the healthy one's receive, depending
        // on iteration order), and the healthy one keeps receiving.
        timeout(RECV_WAIT, async {
            while broker.handle_count("general") != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("failing subscriber should be dropped");

        broker
            .publish("general", Bytes::from_static(b"second"))
            .await
            .unwrap();
        let payload = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_failed_delivery_of_sole_subscriber_tears_room_down() {
        let (store, broker) = broker_with_room("general").await;
        broker.subscribe("general", failing_delivery()).await.unwrap();
        assert!(broker.is_active("general"));

        broker
            .publish("general", Bytes::from_static(b"x"))
            .await
            .unwrap();

        // Dispatch runs on the listener task; give it a moment.
        timeout(RECV_WAIT, async {
            while broker.is_active("general") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("fan-out state should tear down");

        // The aborted listener drops its topic subscription at its next
        // cancellation point, after which publish retires the channel.
        timeout(RECV_WAIT, async {
            loop {
                broker
                    .publish("general", Bytes::from_static(b"y"))
                    .await
                    .unwrap();
                if store.open_topics().await == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("topic subscription should be released");
    }

    #[tokio::test]
    async fn test_events_after_unsubscribe_are_not_delivered() {
        let (_store, broker) = broker_with_room("general").await;
        let (deliver, mut rx) = channel_delivery();
        let handle = broker.subscribe("general", deliver).await.unwrap();
        broker.unsubscribe("general", &handle);

        broker
            .publish("general", Bytes::from_static(b"late"))
            .await
            .unwrap();

        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_rooms_do_not_interfere() {
        let (store, broker) = broker_with_room("general").await;
        store.set_add(RoomKeys::rooms_set(), "random").await.unwrap();

        let (deliver_g, mut rx_g) = channel_delivery();
        let (deliver_r, mut rx_r) = channel_delivery();
        broker.subscribe("general", deliver_g).await.unwrap();
        broker.subscribe("random", deliver_r).await.unwrap();
        assert_eq!(broker.active_rooms(), 2);

        broker
            .publish("general", Bytes::from_static(b"to-general"))
            .await
            .unwrap();

        let payload = timeout(RECV_WAIT, rx_g.recv()).await.unwrap().unwrap();
        assert_eq!(payload, Bytes::from_static(b"to-general"));
        assert!(timeout(Duration::from_millis(100), rx_r.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_share_one_listener() {
        let (_store, broker) = broker_with_room("general").await;

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let broker = Arc::clone(&broker);
            tasks.push(tokio::spawn(async move {
                let (deliver, rx) = {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let deliver: DeliveryFn =
                        Box::new(move |payload| tx.send(payload).map_err(|_| DeliveryError));
                    (deliver, rx)
                };
                let handle = broker.subscribe("general", deliver).await.unwrap();
                (handle, rx)
            }));
        }

        let mut subs = Vec::new();
        for task in tasks {
            subs.push(task.await.unwrap());
        }
        assert_eq!(broker.handle_count("general"), 16);

        broker
            .publish("general", Bytes::from_static(b"fan"))
            .await
            .unwrap();
        for (_, rx) in &mut subs {
            let payload = timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap();
            assert_eq!(payload, Bytes::from_static(b"fan"));
        }

        for (handle, _) in &subs {
            broker.unsubscribe("general", handle);
        }
        assert!(!broker.is_active("general"));
    }
}
