//! # Wire Messages
//!
//! Peer messages are one opcode byte followed by a fixed-size payload, so
//! no length prefix is needed.
//!
//! | Opcode | Payload | Meaning |
//! |--------|---------|---------|
//! | `'r'` | 8-byte little-endian index | request block (0 = responder's head) |
//! | `'b'` | one record | response to a request |
//! | `'n'` | one record | push of a newly appended head |

use super::block::{Block, BLOCK_SIZE};
use super::errors::BlockLogError;

/// Size of the index carried by a request.
pub const INDEX_SIZE: usize = 8;

/// Message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Request = b'r',
    Response = b'b',
    NewBlock = b'n',
}

impl Opcode {
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'r' => Some(Self::Request),
            b'b' => Some(Self::Response),
            b'n' => Some(Self::NewBlock),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Bytes that follow the opcode.
    #[must_use]
    pub fn payload_size(self) -> usize {
        match self {
            Self::Request => INDEX_SIZE,
            Self::Response | Self::NewBlock => BLOCK_SIZE,
        }
    }
}

#[must_use]
pub fn encode_request(index: u64) -> Vec<u8> {
    let mut message = Vec::with_capacity(1 + INDEX_SIZE);
    message.push(Opcode::Request.as_byte());
    message.extend_from_slice(&index.to_le_bytes());
    message
}

/// Opcode followed by the raw record.
#[must_use]
pub fn encode_record(opcode: Opcode, block: &Block) -> Vec<u8> {
    let mut message = Vec::with_capacity(1 + BLOCK_SIZE);
    message.push(opcode.as_byte());
    message.extend_from_slice(&block.encode());
    message
}

/// Decode the index of a request payload (the bytes after the opcode).
pub fn decode_index(payload: &[u8]) -> Result<u64, BlockLogError> {
    let bytes: [u8; INDEX_SIZE] = payload
        .get(..INDEX_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or(BlockLogError::InvalidMessage {
            reason: "request index needs 8 bytes",
        })?;
    Ok(u64::from_le_bytes(bytes))
}
