//! Correlation registry shared by the receiver loop and response waiters.

use dashmap::DashMap;
use tokio::sync::{futures::Notified, Notify};

use super::protocol::{CallId, Envelope};

/// What the receiver stored for a call id.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSlot {
    Response(Envelope),
    /// Server acknowledged the call without answering it yet.
    Nil,
}

impl From<Envelope> for ResponseSlot {
    fn from(envelope: Envelope) -> Self {
        if envelope.is_nil() {
            ResponseSlot::Nil
        } else {
            ResponseSlot::Response(envelope)
        }
    }
}

/// Thread-safe `CallId -> ResponseSlot` map with wake-ups on insert.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    entries: DashMap<CallId, ResponseSlot>,
    notify: Notify,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a slot, replacing any stale one, and wake every waiter.
    pub fn insert(&self, call_id: CallId, slot: ResponseSlot) -> Option<ResponseSlot> {
        let previous = self.entries.insert(call_id, slot);
        self.notify.notify_waiters();
        previous
    }

    /// Atomically remove and return the slot for `call_id`.
    pub fn take(&self, call_id: CallId) -> Option<ResponseSlot> {
        self.entries.remove(&call_id).map(|(_, slot)| slot)
    }

    pub fn get(&self, call_id: CallId) -> Option<ResponseSlot> {
        self.entries.get(&call_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, call_id: CallId) -> bool {
        self.entries.contains_key(&call_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wake waiters without storing anything, e.g. on teardown.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Future completing on the next insert or `wake_all`.
    ///
    /// Call `enable()` on the pinned future before checking the registry so an
    /// insert between the check and the await is not missed.
    pub(crate) fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
