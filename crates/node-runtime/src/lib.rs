//! # Node Runtime Library
//!
//! Assembly of a bitchat node. The `bitchat` binary in `main.rs` is a thin
//! wrapper around [`application::run`].
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | `cli` | Command line flags |
//! | `container` | Layered configuration |
//! | `handlers` | The bus-driven dispatcher |
//! | `application` | Runtime, wiring and signal handling |
//! | `logging` | File-backed tracing subscriber |
//! | `testing` | Scripted console (feature `test-utils`) |

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod application;
pub mod cli;
pub mod container;
pub mod handlers;
pub mod logging;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use application::Application;
pub use cli::Cli;
pub use container::{ConfigError, NodeConfig};
pub use handlers::Dispatcher;
