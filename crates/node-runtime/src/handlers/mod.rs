//! # Event Handlers
//!
//! Bus-driven behavior of the node.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, EMAIL_PROMPT, MESSAGE_PROMPT};
