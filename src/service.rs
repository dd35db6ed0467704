//! Chat service orchestration
//!
//! Create/join/send/read/delete against the store, with live delivery routed
//! through the fan-out broker. Every operation validates room existence
//! before mutating anything; the log append always completes before the
//! matching topic publish, so history reads never miss a message whose live
//! event has already been seen.

use std::sync::Arc;

use crate::broker::{DeliveryFn, FanoutBroker, SubscriberHandle};
use crate::error::ChatError;
use crate::keys::RoomKeys;
use crate::message::ChatMessage;
use crate::store::Store;

/// Room, participant, and message operations over a [`Store`], with live
/// fan-out through a shared [`FanoutBroker`]
pub struct ChatService {
    store: Arc<dyn Store>,
    broker: Arc<FanoutBroker>,
}

impl ChatService {
    /// Create a service over an existing broker
    pub fn new(store: Arc<dyn Store>, broker: Arc<FanoutBroker>) -> Self {
        Self { store, broker }
    }

    /// Create a service and its broker from a store
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let broker = Arc::new(FanoutBroker::new(Arc::clone(&store)));
        Self { store, broker }
    }

    /// The broker this service publishes through
    pub fn broker(&self) -> &Arc<FanoutBroker> {
        &self.broker
    }

    /// Create a room. Fails with `DuplicateRoom` when the normalized
    /// identifier is already registered; returns the normalized identifier.
    pub async fn create_room(&self, name: &str) -> Result<String, ChatError> {
        let room_id = normalize(name);
        if room_id.is_empty() {
            return Err(ChatError::EmptyInput("room name"));
        }
        if self
            .store
            .set_contains(RoomKeys::rooms_set(), &room_id)
            .await?
        {
            return Err(ChatError::DuplicateRoom(room_id));
        }

        let keys = RoomKeys::new(&room_id);
        self.store.set_add(RoomKeys::rooms_set(), &room_id).await?;
        self.store.hash_set(&keys.meta(), "name", &room_id).await?;
        self.store
            .hash_set(&keys.meta(), "createdAt", &chrono::Utc::now().to_rfc3339())
            .await?;

        tracing::info!(room = %room_id, "Room created");
        Ok(room_id)
    }

    /// Add a participant to a room. Re-joining is a no-op, not an error.
    pub async fn join_room(&self, room_id: &str, participant: &str) -> Result<(), ChatError> {
        let room_id = self.existing_room(room_id).await?;
        let participant = participant.trim();
        if participant.is_empty() {
            return Err(ChatError::EmptyInput("participant"));
        }

        let keys = RoomKeys::new(&room_id);
        self.store
            .set_add(&keys.participants(), participant)
            .await?;

        tracing::debug!(room = %room_id, participant, "Participant joined");
        Ok(())
    }

    /// Append a message to the room's log, then publish it for live
    /// delivery. The append happens-before the publish, so a reader chasing
    /// a live event always finds the message already in the log.
    pub async fn send_message(
        &self,
        room_id: &str,
        participant: &str,
        body: &str,
    ) -> Result<ChatMessage, ChatError> {
        let room_id = self.existing_room(room_id).await?;
        if participant.trim().is_empty() {
            return Err(ChatError::EmptyInput("participant"));
        }
        if body.trim().is_empty() {
            return Err(ChatError::EmptyInput("message body"));
        }

        let message = ChatMessage::new(participant, body);
        let payload = message.encode();

        let keys = RoomKeys::new(&room_id);
        self.store
            .list_append(&keys.messages(), payload.clone())
            .await?;
        self.broker.publish(&room_id, payload).await?;

        tracing::debug!(room = %room_id, participant = %message.participant, "Message sent");
        Ok(message)
    }

    /// Last `limit` messages of a room, oldest of the window first.
    /// `limit` is clamped to a minimum of 1.
    pub async fn get_messages(
        &self,
        room_id: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let room_id = self.existing_room(room_id).await?;
        let limit = limit.max(1) as usize;

        let keys = RoomKeys::new(&room_id);
        let raw = self.store.list_tail(&keys.messages(), limit).await?;

        raw.iter()
            .map(|payload| ChatMessage::decode(payload))
            .collect()
    }

    /// Delete a room with its metadata, participant set, and message log.
    ///
    /// Live subscribers are not closed or notified; they stay attached until
    /// they unsubscribe on their own.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), ChatError> {
        let room_id = self.existing_room(room_id).await?;

        let keys = RoomKeys::new(&room_id);
        self.store
            .delete(&[keys.meta(), keys.participants(), keys.messages()])
            .await?;
        self.store
            .set_remove(RoomKeys::rooms_set(), &room_id)
            .await?;

        tracing::info!(room = %room_id, "Room deleted");
        Ok(())
    }

    /// Whether a room exists in the registry
    pub async fn room_exists(&self, room_id: &str) -> Result<bool, ChatError> {
        let room_id = normalize(room_id);
        Ok(self
            .store
            .set_contains(RoomKeys::rooms_set(), &room_id)
            .await?)
    }

    /// Open a live subscription to a room's events.
    ///
    /// Thin delegation to the broker; the caller owns the connection and
    /// must route completion, timeout, and error onto
    /// [`FanoutBroker::unsubscribe`].
    pub async fn subscribe(
        &self,
        room_id: &str,
        deliver: DeliveryFn,
    ) -> Result<Arc<SubscriberHandle>, ChatError> {
        let room_id = normalize(room_id);
        self.broker.subscribe(&room_id, deliver).await
    }

    /// Normalize and check existence, returning the normalized identifier
    async fn existing_room(&self, room_id: &str) -> Result<String, ChatError> {
        let room_id = normalize(room_id);
        if !self
            .store
            .set_contains(RoomKeys::rooms_set(), &room_id)
            .await?
        {
            return Err(ChatError::RoomNotFound(room_id));
        }
        Ok(room_id)
    }
}

fn normalize(room_id: &str) -> String {
    room_id.trim().to_string()
}
