//! Key namespace resolver
//!
//! Maps a room identifier to the storage keys and topic name used for its
//! state. Pure and deterministic: the same room always resolves to the same
//! names, and because each kind of key carries its own suffix, two different
//! rooms can never collide across kinds.

/// Resolved key namespace for one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomKeys {
    room_id: String,
}

impl RoomKeys {
    /// Resolve the namespace for a room identifier
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
        }
    }

    /// Set holding every existing room identifier
    pub fn rooms_set() -> &'static str {
        "chat:rooms"
    }

    /// Hash holding the room's metadata fields
    pub fn meta(&self) -> String {
        format!("chat:rooms:{}:meta", self.room_id)
    }

    /// Set holding the room's participant identifiers
    pub fn participants(&self) -> String {
        format!("chat:rooms:{}:participants", self.room_id)
    }

    /// Append-only list holding the room's encoded messages
    pub fn messages(&self) -> String {
        format!("chat:rooms:{}:messages", self.room_id)
    }

    /// Pub/sub topic the room's live events are published on
    pub fn channel(&self) -> String {
        format!("chat:rooms:{}:channel", self.room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_room_resolves_to_same_keys() {
        let a = RoomKeys::new("general");
        let b = RoomKeys::new("general");

        assert_eq!(a.meta(), b.meta());
        assert_eq!(a.participants(), b.participants());
        assert_eq!(a.messages(), b.messages());
        assert_eq!(a.channel(), b.channel());
    }

    #[test]
    fn test_keys_are_distinct_per_room() {
        let general = RoomKeys::new("general");
        let random = RoomKeys::new("random");

        assert_ne!(general.meta(), random.meta());
        assert_ne!(general.participants(), random.participants());
        assert_ne!(general.messages(), random.messages());
        assert_ne!(general.channel(), random.channel());
    }

    #[test]
    fn test_kinds_are_distinct_within_a_room() {
        let keys = RoomKeys::new("general");
        let all = [
            RoomKeys::rooms_set().to_string(),
            keys.meta(),
            keys.participants(),
            keys.messages(),
            keys.channel(),
        ];

        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_adversarial_room_ids_do_not_collide_across_kinds() {
        // A room id ending in another kind's suffix still resolves uniquely.
        let sneaky = RoomKeys::new("x:meta");
        let plain = RoomKeys::new("x");

        assert_ne!(sneaky.participants(), plain.meta());
        assert_eq!(sneaky.meta(), "chat:rooms:x:meta:meta");
    }
}
