//! # Bus Events
//!
//! Event identities and the payload handed to subscribers.
//!
//! An [`Event`] carries no data of its own. It is a process-unique tag
//! drawn from a global sequence when the event is constructed, so every
//! component declares its events once as statics and compares them by tag.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// Opaque event identity.
#[derive(Clone, Copy)]
pub struct Event {
    tag: u64,
    name: &'static str,
}

impl Event {
    /// Allocate a fresh event. Two calls never yield equal events.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    /// Process-unique tag of this event.
    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Human readable name, used only in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.tag)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Published once by [`crate::EventBus::open`].
pub static ON_START: LazyLock<Event> = LazyLock::new(|| Event::new("bus started"));

/// Performed by [`crate::EventBus::close`] before the scheduler shuts down.
pub static ON_STOP: LazyLock<Event> = LazyLock::new(|| Event::new("bus stopping"));

/// Argument delivered alongside an event.
///
/// Cloning is cheap: the value is shared behind an `Arc` so one
/// notification can fan out to many subscribers.
#[derive(Clone, Default)]
pub struct Payload(Option<Arc<dyn Any + Send + Sync>>);

impl Payload {
    /// A payload with no value.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// Wrap a value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// True when no value is attached.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the value if it has type `T`.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Payload(..)"),
            None => f.write_str("Payload(none)"),
        }
    }
}
