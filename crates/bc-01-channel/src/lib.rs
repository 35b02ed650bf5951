//! # Channels (bc-01)
//!
//! A channel is a byte stream with an open/close lifecycle that is
//! announced on the shared bus. Components never watch each other
//! directly: they subscribe to [`ON_OPEN`] and [`ON_CLOSE`] and compare
//! the [`ChannelId`] payload with the channels they own.
//!
//! ## Implementations
//!
//! | Type | Endpoint |
//! |------|----------|
//! | [`FileChannel`] | regular file, stdin or stdout |
//! | [`SocketChannel`] | one TCP connection |
//! | [`Console`] | stdin for reads, stdout for writes |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain` - ids, lifecycle events, errors
//! - `ports` - the [`Channel`] trait
//! - `adapters/` - file, socket and console implementations

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod ports;

pub use adapters::{Console, FileChannel, FileEndpoint, SocketChannel};
pub use domain::{ChannelError, ChannelId, END_LINE, ON_CLOSE, ON_OPEN};
pub use ports::Channel;
