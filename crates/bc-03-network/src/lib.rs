//! # Network Manager (bc-03)
//!
//! Peer connectivity for a chat node: one listening acceptor that admits
//! any number of inbound peers, and at most one outbound peer that is
//! redialled at a fixed interval whenever the connection fails.
//!
//! Every connection is a [`bc_01_channel::SocketChannel`], so the rest of
//! the node learns about peers only through the channel open/close events.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod errors;
pub mod manager;

pub use config::{ManagerConfig, DEFAULT_RECONNECT_INTERVAL};
pub use errors::NetworkError;
pub use manager::NetworkManager;
