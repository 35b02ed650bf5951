//! # Block Log Service
//!
//! Owns the log file and the head index, and turns local entries and peer
//! records into appended blocks.
//!
//! ## Chaining
//!
//! `store` reads the current head, links a successor to the hash of the
//! head's bytes exactly as read, and writes it at `index * BLOCK_SIZE`.
//! Records are never rewritten, so for every `n >= 1` the `previous_hash`
//! of block `n` is the hash of the record that was head when `n` was
//! appended.
//!
//! `save` writes a peer's record verbatim at its own index and moves the
//! head there. Peer records are not checked against the local chain.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use bc_01_channel::{Channel, ChannelId, FileChannel, ON_CLOSE, ON_OPEN};
use shared_bus::{Event, EventBus, Payload};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::wire::{self, Opcode};
use crate::domain::{current_timestamp, validate_entry, Block, BlockLogError, BLOCK_SIZE};

/// Published after every append. Payload: [`SaveOrigin`].
pub static ON_SAVE: LazyLock<Event> = LazyLock::new(|| Event::new("block saved"));

/// Who produced the block announced by [`ON_SAVE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOrigin {
    /// Appended through [`BlockLog::store`].
    Local,
    /// Received from a peer through [`BlockLog::save`].
    Peer,
}

/// File-backed, hash-chained log.
///
/// The log binds its [`FileChannel`] silently and announces its own
/// lifecycle with [`ON_OPEN`]/[`ON_CLOSE`] under the file channel's id.
pub struct BlockLog {
    bus: Arc<EventBus>,
    file: FileChannel,
    head_index: AtomicU64,
    open: AtomicBool,
    append: Mutex<()>,
}

impl BlockLog {
    #[must_use]
    pub fn new(bus: Arc<EventBus>, path: impl Into<PathBuf>) -> Self {
        Self {
            file: FileChannel::at_path(Arc::clone(&bus), path),
            bus,
            head_index: AtomicU64::new(0),
            open: AtomicBool::new(false),
            append: Mutex::new(()),
        }
    }

    /// Identity carried by this log's open/close events.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.file.id()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.file.path()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Bind the file, writing the genesis record if it holds no complete
    /// record, and publish [`ON_OPEN`].
    ///
    /// On failure a file created by this call is removed again.
    pub async fn open(&self) -> Result<(), BlockLogError> {
        if self.is_open() {
            return Ok(());
        }
        let created = self.file.bind().await?;
        let head = match self.recover_head().await {
            Ok(head) => head,
            Err(e) => {
                self.file.release().await;
                if created {
                    self.discard_file().await;
                }
                return Err(e);
            }
        };
        self.head_index.store(head, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        info!(
            "[bc-02] Block log open at {} (head #{}, created: {})",
            self.display_path(),
            head,
            created
        );
        self.bus.notify(&ON_OPEN, Payload::new(self.id()));
        Ok(())
    }

    /// Perform [`ON_CLOSE`] if open, then release the file.
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.bus.perform(&ON_CLOSE, Payload::new(self.id()));
            info!("[bc-02] Block log closed");
        }
        self.file.release().await;
        self.head_index.store(0, Ordering::SeqCst);
    }

    /// Index of the most recently appended block.
    #[must_use]
    pub fn head_index(&self) -> u64 {
        self.head_index.load(Ordering::SeqCst)
    }

    /// Block at `index`; 0 resolves to the head.
    pub async fn block_at(&self, index: u64) -> Result<Block, BlockLogError> {
        self.ensure_open()?;
        let index = if index == 0 { self.head_index() } else { index };
        self.read_block(index).await
    }

    pub async fn head_block(&self) -> Result<Block, BlockLogError> {
        self.block_at(0).await
    }

    /// Hex SHA-256 of the head record.
    pub async fn head_hash(&self) -> Result<String, BlockLogError> {
        Ok(self.head_block().await?.hash_hex())
    }

    pub async fn head_key(&self) -> Result<String, BlockLogError> {
        Ok(self.head_block().await?.key_str())
    }

    pub async fn head_value(&self) -> Result<String, BlockLogError> {
        Ok(self.head_block().await?.value_str())
    }

    pub async fn head_timestamp(&self) -> Result<i64, BlockLogError> {
        Ok(self.head_block().await?.timestamp)
    }

    /// Append a local entry after the head.
    ///
    /// Rejected without touching the file when `key` or `value` is empty
    /// or wider than its field.
    pub async fn store(&self, key: &str, value: &str) -> Result<Block, BlockLogError> {
        validate_entry(key.as_bytes(), value.as_bytes())?;
        self.ensure_open()?;
        let block = {
            let _append = self.append.lock().await;
            let head = self.read_block(self.head_index()).await?;
            let block = head.successor(key.as_bytes(), value.as_bytes(), current_timestamp())?;
            self.write_record(block.index, &block.encode()).await?;
            self.head_index.store(block.index, Ordering::SeqCst);
            block
        };
        debug!(index = block.index, key, "Stored local entry");
        self.bus.notify(&ON_SAVE, Payload::new(SaveOrigin::Local));
        Ok(block)
    }

    /// Write a peer's raw record at its embedded index and make it the head.
    pub async fn save(&self, raw: &[u8]) -> Result<Block, BlockLogError> {
        let block = Block::decode(raw)?;
        self.ensure_open()?;
        {
            let _append = self.append.lock().await;
            self.write_record(block.index, raw).await?;
            self.head_index.store(block.index, Ordering::SeqCst);
        }
        debug!(index = block.index, key = %block.key_str(), "Saved peer record");
        self.bus.notify(&ON_SAVE, Payload::new(SaveOrigin::Peer));
        Ok(block)
    }

    /// `'r'` followed by `index`.
    #[must_use]
    pub fn make_block_request(index: u64) -> Vec<u8> {
        wire::encode_request(index)
    }

    /// `'b'` followed by the record at `index` (0 = head).
    pub async fn make_block_response(&self, index: u64) -> Result<Vec<u8>, BlockLogError> {
        Ok(wire::encode_record(Opcode::Response, &self.block_at(index).await?))
    }

    /// `'n'` followed by the record at `index` (0 = head).
    pub async fn make_new_block(&self, index: u64) -> Result<Vec<u8>, BlockLogError> {
        Ok(wire::encode_record(Opcode::NewBlock, &self.block_at(index).await?))
    }

    /// Index carried by a request payload.
    pub fn extract_block_index(data: &[u8]) -> Result<u64, BlockLogError> {
        wire::decode_index(data)
    }

    #[must_use]
    pub const fn block_size() -> usize {
        BLOCK_SIZE
    }

    async fn recover_head(&self) -> Result<u64, BlockLogError> {
        let records = self.file.len().await? / BLOCK_SIZE as u64;
        if records > 0 {
            return Ok(records - 1);
        }
        self.write_record(0, &Block::genesis().encode()).await?;
        debug!("Wrote genesis record");
        Ok(0)
    }

    async fn read_block(&self, index: u64) -> Result<Block, BlockLogError> {
        let raw = self.file.read_at(offset(index), BLOCK_SIZE).await?;
        match raw.len() {
            0 => Err(BlockLogError::BlockNotFound { index }),
            actual if actual < BLOCK_SIZE => Err(BlockLogError::ShortRecord {
                index,
                expected: BLOCK_SIZE,
                actual,
            }),
            _ => Block::decode(&raw),
        }
    }

    async fn write_record(&self, index: u64, raw: &[u8]) -> Result<(), BlockLogError> {
        Ok(self.file.write_at(offset(index), raw).await?)
    }

    async fn discard_file(&self) {
        let Some(path) = self.file.path() else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %e, "Failed to remove block log file");
        }
    }

    fn ensure_open(&self) -> Result<(), BlockLogError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BlockLogError::NotOpen)
        }
    }

    fn display_path(&self) -> String {
        self.path()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for BlockLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockLog")
            .field("path", &self.path())
            .field("head_index", &self.head_index())
            .field("open", &self.is_open())
            .finish()
    }
}

fn offset(index: u64) -> u64 {
    index.saturating_mul(BLOCK_SIZE as u64)
}
