//! Per-room fan-out state
//!
//! One `RoomFanout` exists in the broker's map exactly while its room has at
//! least one live subscriber. It pairs the set of open handles with the one
//! upstream topic listener task that feeds them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::handle::{HandleId, SubscriberHandle};

/// Live fan-out state for one room
pub(super) struct RoomFanout {
    /// Currently open subscriber handles
    pub(super) handles: HashMap<HandleId, Arc<SubscriberHandle>>,

    /// The room's single upstream topic listener task
    listener: JoinHandle<()>,
}

impl RoomFanout {
    /// Create the state for a room's first subscriber
    pub(super) fn new(first: Arc<SubscriberHandle>, listener: JoinHandle<()>) -> Self {
        let mut handles = HashMap::new();
        handles.insert(first.id(), first);
        Self { handles, listener }
    }

    /// Snapshot of the current handles, safe to iterate outside any lock
    pub(super) fn snapshot(&self) -> Vec<Arc<SubscriberHandle>> {
        self.handles.values().cloned().collect()
    }

    /// Stop the upstream listener. Aborting the task drops its topic
    /// subscription, which is the store-level unsubscribe.
    pub(super) fn shutdown(self) {
        self.listener.abort();
    }
}
