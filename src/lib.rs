//! Chat room library with per-room live pub/sub fan-out
//!
//! `roomcast` implements named chat rooms over a narrow Redis-shaped store
//! abstraction: participants join a room, messages land in its append-only
//! log, and live listeners receive each message pushed in near-real time
//! rather than by polling.
//!
//! The interesting part is the [`broker::FanoutBroker`]: per room it keeps
//! the set of currently connected push-stream subscribers and exactly one
//! upstream topic listener, fans every event out to all of them, drops a
//! subscriber on its first failed delivery, and tears the whole per-room
//! state down when the last subscriber leaves.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use roomcast::broker::DeliveryError;
//! use roomcast::store::MemoryStore;
//! use roomcast::ChatService;
//!
//! # async fn run() -> Result<(), roomcast::ChatError> {
//! let service = ChatService::with_store(Arc::new(MemoryStore::new()));
//!
//! service.create_room("general").await?;
//! service.join_room("general", "alice").await?;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let handle = service
//!     .subscribe("general", Box::new(move |payload| {
//!         tx.send(payload).map_err(|_| DeliveryError)
//!     }))
//!     .await?;
//!
//! service.send_message("general", "alice", "hi").await?;
//! let event = rx.recv().await; // encoded ChatMessage
//!
//! service.broker().unsubscribe("general", &handle);
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod keys;
pub mod message;
pub mod service;
pub mod store;

pub use broker::FanoutBroker;
pub use error::ChatError;
pub use keys::RoomKeys;
pub use message::ChatMessage;
pub use service::ChatService;
