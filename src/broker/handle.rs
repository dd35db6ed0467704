//! Subscriber handle types
//!
//! A `SubscriberHandle` represents one live push-stream connection for one
//! room. The broker owns it for the lifetime of the connection; it is never
//! persisted. The delivery closure is supplied by the caller (typically
//! wrapping an SSE or WebSocket sender) and is allowed to fail when the
//! remote end has gone away.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use thiserror::Error;

/// Opaque identity of a subscriber handle within its broker
pub type HandleId = u64;

/// A subscriber's transport refused the payload (remote disconnected).
///
/// Contained inside the broker: the failing handle is dropped, and neither
/// the publisher nor the other subscribers ever see this error.
#[derive(Debug, Clone, Copy, Error)]
#[error("subscriber transport closed")]
pub struct DeliveryError;

/// Push one payload to the remote end of a subscriber connection
pub type DeliveryFn = Box<dyn Fn(Bytes) -> Result<(), DeliveryError> + Send + Sync>;

/// One live push-stream connection for one room
pub struct SubscriberHandle {
    id: HandleId,
    room_id: String,
    closed: AtomicBool,
    deliver: DeliveryFn,
}

impl SubscriberHandle {
    pub(super) fn new(id: HandleId, room_id: String, deliver: DeliveryFn) -> Self {
        Self {
            id,
            room_id,
            closed: AtomicBool::new(false),
            deliver,
        }
    }

    /// Identity of this handle (unique per broker)
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Room this handle is subscribed to
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Whether the handle has been unsubscribed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(super) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Push a payload to the remote end. Closed handles refuse delivery.
    pub(super) fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError);
        }
        (self.deliver)(payload)
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("room_id", &self.room_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_handle_refuses_delivery() {
        let handle = SubscriberHandle::new(1, "general".to_string(), Box::new(|_| Ok(())));

        assert!(handle.deliver(Bytes::from_static(b"x")).is_ok());
        handle.close();
        assert!(handle.is_closed());
        assert!(handle.deliver(Bytes::from_static(b"x")).is_err());
    }
}
