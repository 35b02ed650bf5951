//! # Block Log (bc-02)
//!
//! Append-only log of fixed-size records, each linked to its predecessor
//! by a SHA-256 digest, stored in one flat file at `index * BLOCK_SIZE`.
//!
//! ## Domain Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | Genesis | A fresh log holds one record whose key starts with `'@'` |
//! | Chaining | `block[n].previous_hash == sha256(head before n was appended)` |
//! | Append-only | Records are never rewritten or deleted |
//! | Entry limits | Keys are 1..=20 bytes, values 1..=140 bytes |
//!
//! ## Crate Structure
//!
//! - `domain/` - record layout, wire messages, errors
//! - `service.rs` - the [`BlockLog`] itself
//!
//! ## Usage
//!
//! ```ignore
//! let log = BlockLog::new(bus, "alice.blockchain");
//! log.open().await?;
//! log.store("alice@example.org", "hello").await?;
//! let push = log.make_new_block(0).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod domain;
pub mod service;

pub use domain::wire::Opcode;
pub use domain::{
    current_timestamp, Block, BlockLogError, Hash, BLOCK_SIZE, INDEX_SIZE, KEY_SIZE, VALUE_SIZE,
};
pub use service::{BlockLog, SaveOrigin, ON_SAVE};
