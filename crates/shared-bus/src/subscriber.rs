//! # Subscription Table
//!
//! Maps each event tag to the ordered list of callbacks registered for it.
//!
//! A callback returns `true` to ask for its own removal after it runs.
//! Identical closures registered twice are distinct subscriptions: removal
//! goes through the [`SubscriptionHandle`] returned at registration.
//!
//! Each registration carries a gate that serializes its invocations across
//! workers, so a callback never runs concurrently with itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::events::{Event, Payload};

/// Subscriber callback. Returning `true` unsubscribes it.
pub type Callback = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Held while a callback runs. Reentrant so a callback may publish its own
/// event inline.
pub(crate) type Gate = Arc<ReentrantMutex<()>>;

/// Identifies one registration on one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    event: Event,
    id: u64,
}

impl SubscriptionHandle {
    /// The event this subscription listens to.
    #[must_use]
    pub fn event(&self) -> Event {
        self.event
    }

    /// Registration number, unique within one bus.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Subscriber {
    id: u64,
    callback: Callback,
    gate: Gate,
}

/// Registration order is preserved per event.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: u64,
    entries: HashMap<u64, Vec<Subscriber>>,
}

impl SubscriptionTable {
    pub(crate) fn insert(&mut self, event: Event, callback: Callback) -> SubscriptionHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.entries
            .entry(event.tag())
            .or_default()
            .push(Subscriber {
                id,
                callback,
                gate: Arc::new(ReentrantMutex::new(())),
            });
        SubscriptionHandle { event, id }
    }

    /// Remove one registration. Events left without subscribers are dropped
    /// from the table.
    pub(crate) fn remove(&mut self, tag: u64, id: u64) -> bool {
        let Some(subscribers) = self.entries.get_mut(&tag) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            self.entries.remove(&tag);
        }
        removed
    }

    /// Registration ids for `tag`, in subscription order.
    pub(crate) fn snapshot(&self, tag: u64) -> Vec<u64> {
        self.entries
            .get(&tag)
            .map(|subscribers| subscribers.iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    pub(crate) fn callback(&self, tag: u64, id: u64) -> Option<(Callback, Gate)> {
        self.entries
            .get(&tag)?
            .iter()
            .find(|s| s.id == id)
            .map(|s| (Arc::clone(&s.callback), Arc::clone(&s.gate)))
    }

    pub(crate) fn contains(&self, tag: u64, id: u64) -> bool {
        self.entries
            .get(&tag)
            .is_some_and(|subscribers| subscribers.iter().any(|s| s.id == id))
    }

    pub(crate) fn count(&self, tag: u64) -> usize {
        self.entries.get(&tag).map_or(0, Vec::len)
    }

    pub(crate) fn events(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("events", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
