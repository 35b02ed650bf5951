//! # Channel Domain
//!
//! Identity, lifecycle events and errors shared by every channel kind.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use shared_bus::{Event, Payload};
use thiserror::Error;

/// Line terminator used by `read(0)`.
pub const END_LINE: u8 = b'\n';

static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Identity of a channel instance.
///
/// Carried as the payload of [`ON_OPEN`] and [`ON_CLOSE`], so subscribers
/// can tell which channel changed state by comparing ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Extract the id carried by a channel event.
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        payload.get::<Self>().copied()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Published after a channel opens. Payload: [`ChannelId`].
pub static ON_OPEN: LazyLock<Event> = LazyLock::new(|| Event::new("channel opened"));

/// Performed when an open channel closes. Payload: [`ChannelId`].
pub static ON_CLOSE: LazyLock<Event> = LazyLock::new(|| Event::new("channel closed"));

/// Errors from channel I/O.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel {0} is not open")]
    NotOpen(ChannelId),

    #[error("channel {0} has no connected stream")]
    NotConnected(ChannelId),

    /// The channel was closed while the operation was pending.
    #[error("operation aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// True for cancellations caused by a local close.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// True when the peer or file reached end of stream.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
