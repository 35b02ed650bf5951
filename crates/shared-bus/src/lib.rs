//! # Shared Bus - Event Bus and Scheduler
//!
//! Every bitchat component talks to the others through this crate: a
//! publish/subscribe registry keyed by opaque [`Event`] identities and a
//! task scheduler that runs deferred deliveries on a pool of tokio tasks.
//!
//! ## Flow
//!
//! ```text
//! ┌──────────────┐   notify()/perform()   ┌──────────────┐
//! │ Component A  │ ─────────────────────→ │   EventBus   │
//! └──────────────┘                        │  [Scheduler] │
//!                                         └──────┬───────┘
//!                               Deliver task     │  callback(&Payload)
//!                                                ↓
//!                                         ┌──────────────┐
//!                                         │ Component B  │
//!                                         └──────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! - [`EventBus::open`] publishes [`ON_START`]
//! - [`EventBus::close`] performs [`ON_STOP`] and schedules a drained shutdown
//! - [`EventBus::run`] returns once the scheduler stops or runs out of work

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod scheduler;
pub mod subscriber;

// Re-export main types
pub use events::{Event, Payload, ON_START, ON_STOP};
pub use publisher::{EventBus, DEFAULT_DRAIN_TIMEOUT};
pub use scheduler::{BoxFuture, WorkGuard};
pub use subscriber::{Callback, SubscriptionHandle};
