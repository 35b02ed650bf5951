//! # Block Record
//!
//! Fixed-size record stored on disk and sent on the wire byte for byte.
//!
//! ## Layout (little-endian, no padding)
//!
//! | Offset | Field | Size |
//! |--------|-------|------|
//! | 0 | index | 8 |
//! | 8 | timestamp (ms since epoch) | 8 |
//! | 16 | key | 20 |
//! | 36 | value | 140 |
//! | 176 | previous hash | 32 |

use sha2::{Digest, Sha256};

use super::errors::BlockLogError;

pub const KEY_SIZE: usize = 20;
pub const VALUE_SIZE: usize = 140;
pub const HASH_SIZE: usize = 32;

/// Size of one record in bytes.
pub const BLOCK_SIZE: usize = 8 + 8 + KEY_SIZE + VALUE_SIZE + HASH_SIZE;

/// First key byte of the sentinel record at index 0.
pub const GENESIS_MARKER: u8 = b'@';

const TIMESTAMP_OFFSET: usize = 8;
const KEY_OFFSET: usize = 16;
const VALUE_OFFSET: usize = KEY_OFFSET + KEY_SIZE;
const HASH_OFFSET: usize = VALUE_OFFSET + VALUE_SIZE;

/// SHA-256 digest.
pub type Hash = [u8; HASH_SIZE];

/// One entry of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub key: [u8; KEY_SIZE],
    pub value: [u8; VALUE_SIZE],
    pub previous_hash: Hash,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            index: 0,
            timestamp: 0,
            key: [0; KEY_SIZE],
            value: [0; VALUE_SIZE],
            previous_hash: [0; HASH_SIZE],
        }
    }
}

impl Block {
    /// The sentinel written to an empty log.
    #[must_use]
    pub fn genesis() -> Self {
        let mut block = Self::default();
        block.key[0] = GENESIS_MARKER;
        block
    }

    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.key[0] == GENESIS_MARKER
    }

    /// Serialize to the on-disk and wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut raw = [0; BLOCK_SIZE];
        raw[..TIMESTAMP_OFFSET].copy_from_slice(&self.index.to_le_bytes());
        raw[TIMESTAMP_OFFSET..KEY_OFFSET].copy_from_slice(&self.timestamp.to_le_bytes());
        raw[KEY_OFFSET..VALUE_OFFSET].copy_from_slice(&self.key);
        raw[VALUE_OFFSET..HASH_OFFSET].copy_from_slice(&self.value);
        raw[HASH_OFFSET..].copy_from_slice(&self.previous_hash);
        raw
    }

    /// Parse a record. `raw` must be exactly [`BLOCK_SIZE`] bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, BlockLogError> {
        let actual = raw.len();
        let raw: &[u8; BLOCK_SIZE] = raw
            .try_into()
            .map_err(|_| BlockLogError::InvalidRecordLength {
                expected: BLOCK_SIZE,
                actual,
            })?;
        Ok(Self {
            index: u64::from_le_bytes(field(raw, 0)),
            timestamp: i64::from_le_bytes(field(raw, TIMESTAMP_OFFSET)),
            key: field(raw, KEY_OFFSET),
            value: field(raw, VALUE_OFFSET),
            previous_hash: field(raw, HASH_OFFSET),
        })
    }

    /// SHA-256 over the encoded record.
    #[must_use]
    pub fn hash(&self) -> Hash {
        Sha256::digest(self.encode()).into()
    }

    /// Lowercase hex of [`Block::hash`].
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Key up to the first NUL byte.
    #[must_use]
    pub fn key_str(&self) -> String {
        text(&self.key)
    }

    /// Value up to the first NUL byte.
    #[must_use]
    pub fn value_str(&self) -> String {
        text(&self.value)
    }

    /// The record that follows this one when it is the head: linked to
    /// this record's hash, one index further, carrying the new entry.
    pub fn successor(&self, key: &[u8], value: &[u8], timestamp: i64) -> Result<Self, BlockLogError> {
        validate_entry(key, value)?;
        Ok(Self {
            index: self.index + 1,
            timestamp,
            key: padded(key),
            value: padded(value),
            previous_hash: self.hash(),
        })
    }
}

/// Reject entries that would not fit a record.
pub fn validate_entry(key: &[u8], value: &[u8]) -> Result<(), BlockLogError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if value.is_empty() {
        "value is empty"
    } else if key.len() > KEY_SIZE {
        "key exceeds 20 bytes"
    } else if value.len() > VALUE_SIZE {
        "value exceeds 140 bytes"
    } else {
        return Ok(());
    };
    Err(BlockLogError::InvalidEntry { reason })
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn field<const N: usize>(raw: &[u8; BLOCK_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&raw[offset..offset + N]);
    out
}

fn padded<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
