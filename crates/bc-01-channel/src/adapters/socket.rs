//! TCP socket channel.
//!
//! A [`SocketChannel`] is created empty and later attached to a connected
//! [`TcpStream`], either accepted by a listener or dialled by the network
//! manager. The stream is split so a pending read never blocks a write.
//! Closing detaches the stream; a closed channel can be attached again,
//! which is how the outbound peer reconnects.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shared_bus::{EventBus, Payload};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

use crate::domain::{ChannelError, ChannelId, ON_CLOSE, ON_OPEN};
use crate::ports::{abortable, read_from, Channel};

#[derive(Debug, Clone, Copy)]
struct Endpoints {
    local: SocketAddr,
    remote: SocketAddr,
}

/// Channel over one TCP connection.
pub struct SocketChannel {
    id: ChannelId,
    bus: Arc<EventBus>,
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    endpoints: parking_lot::Mutex<Option<Endpoints>>,
    open: AtomicBool,
    closed: watch::Sender<bool>,
}

impl SocketChannel {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        let (closed, _) = watch::channel(true);
        Self {
            id: ChannelId::next(),
            bus,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            endpoints: parking_lot::Mutex::new(None),
            open: AtomicBool::new(false),
            closed,
        }
    }

    /// Take ownership of a connected stream. Any previous stream is
    /// replaced.
    pub async fn attach(&self, stream: TcpStream) -> Result<(), ChannelError> {
        let endpoints = Endpoints {
            local: stream.local_addr()?,
            remote: stream.peer_addr()?,
        };
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(BufReader::new(read_half));
        *self.writer.lock().await = Some(write_half);
        *self.endpoints.lock() = Some(endpoints);
        self.closed.send_replace(false);
        debug!(channel = %self.id, local = %endpoints.local, remote = %endpoints.remote, "Socket attached");
        Ok(())
    }

    /// True while a stream is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.endpoints.lock().is_some()
    }

    /// `ip:port` of the local end.
    #[must_use]
    pub fn local_address(&self) -> Option<String> {
        self.endpoints.lock().map(|e| e.local.to_string())
    }

    /// `ip:port` of the peer.
    #[must_use]
    pub fn remote_address(&self) -> Option<String> {
        self.endpoints.lock().map(|e| e.remote.to_string())
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.endpoints.lock().map(|e| e.remote)
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::NotOpen(self.id))
        }
    }
}

#[async_trait]
impl Channel for SocketChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    /// Requires an attached stream.
    async fn open(&self) -> Result<(), ChannelError> {
        if !self.is_attached() {
            return Err(ChannelError::NotConnected(self.id));
        }
        self.open.store(true, Ordering::SeqCst);
        self.bus.notify(&ON_OPEN, Payload::new(self.id));
        Ok(())
    }

    async fn close(&self) {
        let was_open = self.open.swap(false, Ordering::SeqCst);
        let endpoints = self.endpoints.lock().take();
        if !was_open && endpoints.is_none() {
            return;
        }
        if was_open {
            self.bus.perform(&ON_CLOSE, Payload::new(self.id));
        }
        self.closed.send_replace(true);
        self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                trace!(channel = %self.id, error = %e, "Socket shutdown failed");
            }
        }
        debug!(
            channel = %self.id,
            remote = ?endpoints.map(|e| e.remote),
            "Socket closed"
        );
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn read(&self, size: usize) -> Result<Vec<u8>, ChannelError> {
        self.ensure_open()?;
        abortable(&self.closed, async {
            let mut slot = self.reader.lock().await;
            let reader = slot.as_mut().ok_or(ChannelError::NotConnected(self.id))?;
            Ok(read_from(reader, size).await?)
        })
        .await
    }

    async fn write(&self, data: &[u8]) -> Result<(), ChannelError> {
        self.ensure_open()?;
        abortable(&self.closed, async {
            let mut slot = self.writer.lock().await;
            let writer = slot.as_mut().ok_or(ChannelError::NotConnected(self.id))?;
            writer.write_all(data).await?;
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketChannel")
            .field("id", &self.id)
            .field("remote", &self.remote_addr())
            .field("open", &self.is_open())
            .finish()
    }
}
