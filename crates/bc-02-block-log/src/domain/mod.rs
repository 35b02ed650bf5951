//! Pure block log domain: record layout, wire messages, errors.

pub mod block;
pub mod errors;
pub mod wire;

pub use block::{
    current_timestamp, validate_entry, Block, Hash, BLOCK_SIZE, GENESIS_MARKER, HASH_SIZE,
    KEY_SIZE, VALUE_SIZE,
};
pub use errors::BlockLogError;
pub use wire::{Opcode, INDEX_SIZE};
