//! Chat message record and wire codec
//!
//! A `ChatMessage` is immutable once created. Its JSON encoding is the unit
//! stored in a room's message log and the unit published on the room's topic,
//! so `decode(encode(m)) == m` must hold for every valid message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// One message in a room's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent it (trimmed, non-empty)
    pub participant: String,
    /// Message body (trimmed, non-empty)
    pub body: String,
    /// Send time in epoch milliseconds
    pub timestamp: i64,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    ///
    /// Inputs are trimmed here; callers validate non-emptiness before
    /// construction (see `ChatService::send_message`).
    pub fn new(participant: &str, body: &str) -> Self {
        Self {
            participant: participant.trim().to_string(),
            body: body.trim().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Encode to the wire form stored in the log and published on the topic
    pub fn encode(&self) -> Bytes {
        // Serializing a struct of two strings and an i64 cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Decode the wire form back into a message.
    ///
    /// Fails with `ChatError::MalformedPayload` when the bytes do not parse
    /// back into the three required fields.
    pub fn decode(payload: &[u8]) -> Result<Self, ChatError> {
        serde_json::from_slice(payload).map_err(ChatError::MalformedPayload)
    }
}
