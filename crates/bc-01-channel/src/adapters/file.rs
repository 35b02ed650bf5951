//! File-backed channel.
//!
//! Wraps a filesystem path or a duplicate of the process's standard
//! input/output. Besides the streaming [`Channel`] interface it offers
//! positioned reads and writes for record-oriented owners such as the
//! block log, which binds the file without announcing it on the bus.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shared_bus::{EventBus, Payload};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

use crate::domain::{ChannelError, ChannelId, ON_CLOSE, ON_OPEN};
use crate::ports::{abortable, read_from, Channel};

/// What a [`FileChannel`] is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEndpoint {
    /// A regular file, created on bind if missing.
    Path(PathBuf),
    /// Duplicate of the process's standard input.
    StdIn,
    /// Duplicate of the process's standard output.
    StdOut,
}

/// Channel over a file descriptor.
pub struct FileChannel {
    id: ChannelId,
    bus: Arc<EventBus>,
    endpoint: FileEndpoint,
    file: Mutex<Option<BufReader<File>>>,
    bound: AtomicBool,
    closed: watch::Sender<bool>,
}

impl FileChannel {
    #[must_use]
    pub fn new(bus: Arc<EventBus>, endpoint: FileEndpoint) -> Self {
        let (closed, _) = watch::channel(true);
        Self {
            id: ChannelId::next(),
            bus,
            endpoint,
            file: Mutex::new(None),
            bound: AtomicBool::new(false),
            closed,
        }
    }

    /// Channel over a regular file.
    #[must_use]
    pub fn at_path(bus: Arc<EventBus>, path: impl Into<PathBuf>) -> Self {
        Self::new(bus, FileEndpoint::Path(path.into()))
    }

    /// Path of the underlying file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.endpoint {
            FileEndpoint::Path(path) => Some(path),
            FileEndpoint::StdIn | FileEndpoint::StdOut => None,
        }
    }

    /// Acquire the descriptor without publishing [`ON_OPEN`].
    ///
    /// Returns `true` when the call created a new file. Binding an already
    /// bound channel is a no-op.
    pub async fn bind(&self) -> Result<bool, ChannelError> {
        let mut slot = self.file.lock().await;
        if slot.is_some() {
            return Ok(false);
        }
        let (file, created) = match &self.endpoint {
            FileEndpoint::Path(path) => open_path(path).await?,
            FileEndpoint::StdIn => (duplicate(&io::stdin())?, false),
            FileEndpoint::StdOut => (duplicate(&io::stdout())?, false),
        };
        *slot = Some(BufReader::new(file));
        self.closed.send_replace(false);
        self.bound.store(true, Ordering::SeqCst);
        debug!(channel = %self.id, endpoint = ?self.endpoint, created, "File bound");
        Ok(created)
    }

    /// Drop the descriptor without publishing [`ON_CLOSE`]. Pending
    /// operations fail with [`ChannelError::Aborted`].
    pub async fn release(&self) {
        self.bound.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
        if self.file.lock().await.take().is_some() {
            debug!(channel = %self.id, "File released");
        }
    }

    /// Current size of the file in bytes.
    pub async fn len(&self) -> Result<u64, ChannelError> {
        let slot = self.file.lock().await;
        let file = slot.as_ref().ok_or(ChannelError::NotOpen(self.id))?;
        Ok(file.get_ref().metadata().await?.len())
    }

    /// Read up to `size` bytes starting at `offset`. The result is shorter
    /// than `size` only when the file ends first.
    pub async fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>, ChannelError> {
        abortable(&self.closed, async {
            let mut slot = self.file.lock().await;
            let file = slot.as_mut().ok_or(ChannelError::NotOpen(self.id))?;
            file.seek(io::SeekFrom::Start(offset)).await?;
            let mut buffer = Vec::with_capacity(size);
            (&mut *file).take(size as u64).read_to_end(&mut buffer).await?;
            trace!(channel = %self.id, offset, read = buffer.len(), "Positioned read");
            Ok(buffer)
        })
        .await
    }

    /// Write all of `data` at `offset` and flush.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), ChannelError> {
        abortable(&self.closed, async {
            let mut slot = self.file.lock().await;
            let file = slot.as_mut().ok_or(ChannelError::NotOpen(self.id))?;
            file.seek(io::SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            file.flush().await?;
            trace!(channel = %self.id, offset, written = data.len(), "Positioned write");
            Ok(())
        })
        .await
    }

    fn ensure_bound(&self) -> Result<(), ChannelError> {
        if self.bound.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::NotOpen(self.id))
        }
    }
}

#[async_trait]
impl Channel for FileChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn open(&self) -> Result<(), ChannelError> {
        self.bind().await?;
        self.bus.notify(&ON_OPEN, Payload::new(self.id));
        Ok(())
    }

    async fn close(&self) {
        if self.bound.swap(false, Ordering::SeqCst) {
            self.bus.perform(&ON_CLOSE, Payload::new(self.id));
        }
        self.release().await;
    }

    fn is_open(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    async fn read(&self, size: usize) -> Result<Vec<u8>, ChannelError> {
        self.ensure_bound()?;
        abortable(&self.closed, async {
            let mut slot = self.file.lock().await;
            let file = slot.as_mut().ok_or(ChannelError::NotOpen(self.id))?;
            Ok(read_from(file, size).await?)
        })
        .await
    }

    async fn write(&self, data: &[u8]) -> Result<(), ChannelError> {
        self.ensure_bound()?;
        abortable(&self.closed, async {
            let mut slot = self.file.lock().await;
            let file = slot.as_mut().ok_or(ChannelError::NotOpen(self.id))?;
            file.write_all(data).await?;
            file.flush().await?;
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("bound", &self.is_open())
            .finish()
    }
}

async fn open_path(path: &Path) -> Result<(File, bool), ChannelError> {
    let created = !tokio::fs::try_exists(path).await?;
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    options.mode(0o640);
    let file = options.open(path).await?;
    Ok((file, created))
}

#[cfg(unix)]
fn duplicate(stream: &impl std::os::fd::AsFd) -> io::Result<File> {
    let fd = stream.as_fd().try_clone_to_owned()?;
    Ok(File::from_std(std::fs::File::from(fd)))
}

#[cfg(windows)]
fn duplicate(stream: &impl std::os::windows::io::AsHandle) -> io::Result<File> {
    let handle = stream.as_handle().try_clone_to_owned()?;
    Ok(File::from_std(std::fs::File::from(handle)))
}
