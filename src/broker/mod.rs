//! Room-scoped live fan-out
//!
//! The broker bridges each room's upstream event topic to every live
//! push-stream subscriber of that room.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<FanoutBroker>
//!                  ┌────────────────────────────┐
//!                  │ rooms: DashMap<RoomId,     │
//!                  │   RoomFanout {             │
//!                  │     handles,               │
//!                  │     listener: JoinHandle,  │
//!                  │   }                        │
//!                  │ >                          │
//!                  └─────────────┬──────────────┘
//!                                │ one topic listener per active room
//!          ┌─────────────────────┼─────────────────────┐
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//!     [Subscriber]          [Subscriber]          [Subscriber]
//!     deliver(payload)      deliver(payload)      deliver(payload)
//! ```
//!
//! A room's fan-out state exists exactly while it has live subscribers:
//! the first `subscribe` registers the upstream topic listener, the last
//! `unsubscribe` (or last failed delivery) tears it down. Failed deliveries
//! remove only the failing handle and are invisible to everyone else.

pub mod fanout;
pub mod handle;
pub(crate) mod room;

pub use fanout::FanoutBroker;
pub use handle::{DeliveryError, DeliveryFn, HandleId, SubscriberHandle};
