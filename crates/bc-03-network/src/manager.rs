//! # Network Manager
//!
//! Owns the listening acceptor, the outbound connection and the set of
//! accepted inbound connections.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! open() ──→ bind + listen ──→ accept loop ──→ inbound.push + open (ON_OPEN)
//!    │
//!    └──→ connect(outbound) ──ok──→ outbound.attach + open (ON_OPEN)
//!               │
//!               └──err──→ reconnect: close outbound, sleep interval, connect
//! ```
//!
//! Inbound channels leave the set when they close: the manager listens for
//! `ON_CLOSE` and prunes by channel id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bc_01_channel::{Channel, ChannelId, SocketChannel, ON_CLOSE};
use parking_lot::Mutex;
use shared_bus::{EventBus, SubscriptionHandle};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::{ManagerConfig, LISTEN_BACKLOG};
use crate::errors::NetworkError;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Acceptor {
    port: u16,
    task: AbortHandle,
}

/// Peer connection manager. Methods that start background work take
/// `self: &Arc<Self>`.
pub struct NetworkManager {
    bus: Arc<EventBus>,
    config: ManagerConfig,
    outbound: Arc<SocketChannel>,
    inbound: Mutex<Vec<Arc<SocketChannel>>>,
    acceptor: Mutex<Option<Acceptor>>,
    dialing: Mutex<Option<AbortHandle>>,
    timer: Mutex<Option<AbortHandle>>,
    pruning: Mutex<Option<SubscriptionHandle>>,
}

impl NetworkManager {
    #[must_use]
    pub fn new(bus: Arc<EventBus>, config: ManagerConfig) -> Self {
        Self {
            outbound: Arc::new(SocketChannel::new(Arc::clone(&bus))),
            bus,
            config,
            inbound: Mutex::new(Vec::new()),
            acceptor: Mutex::new(None),
            dialing: Mutex::new(None),
            timer: Mutex::new(None),
            pruning: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// True while the acceptor is listening.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.acceptor.lock().is_some()
    }

    /// Port the acceptor is bound to.
    #[must_use]
    pub fn listening_port(&self) -> Option<u16> {
        self.acceptor.lock().as_ref().map(|a| a.port)
    }

    /// The outbound channel. Present even when never connected.
    #[must_use]
    pub fn outbound(&self) -> Arc<SocketChannel> {
        Arc::clone(&self.outbound)
    }

    /// Configured outbound peer.
    #[must_use]
    pub fn outbound_addr(&self) -> Option<SocketAddr> {
        self.config.outbound
    }

    /// Snapshot of the accepted connections.
    #[must_use]
    pub fn inbound(&self) -> Vec<Arc<SocketChannel>> {
        self.inbound.lock().clone()
    }

    /// Accepted connection with this id, if still present.
    #[must_use]
    pub fn find_inbound(&self, id: ChannelId) -> Option<Arc<SocketChannel>> {
        self.inbound.lock().iter().find(|c| c.id() == id).cloned()
    }

    /// Start listening and, if configured, dial the outbound peer. Calling
    /// it again while open does nothing.
    pub async fn open(self: &Arc<Self>) -> Result<(), NetworkError> {
        if self.is_open() {
            return Ok(());
        }
        let listener = bind(self.config.listen_addr)?;
        let port = listener.local_addr()?.port();

        let weak = Arc::downgrade(self);
        let pruning = self.bus.subscribe(&ON_CLOSE, move |payload| {
            let Some(manager) = weak.upgrade() else {
                return true;
            };
            if let Some(id) = ChannelId::from_payload(payload) {
                manager.forget_inbound(id);
            }
            false
        });
        if let Some(stale) = self.pruning.lock().replace(pruning) {
            self.bus.unsubscribe(stale);
        }

        let task = tokio::spawn(Arc::clone(self).accept_loop(listener));
        *self.acceptor.lock() = Some(Acceptor {
            port,
            task: task.abort_handle(),
        });
        info!("[bc-03] Listening on port {}", port);

        if let Some(peer) = self.config.outbound {
            self.connect(peer);
        }
        Ok(())
    }

    /// Tear everything down. Best effort: failures are logged only.
    pub async fn close(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.abort();
        }
        let dialing = self.dialing.lock().take();
        if let Some(dialing) = dialing {
            dialing.abort();
        }

        for channel in self.inbound() {
            channel.close().await;
        }

        let acceptor = self.acceptor.lock().take();
        if let Some(acceptor) = acceptor {
            acceptor.task.abort();
            info!("[bc-03] Stopped listening on port {}", acceptor.port);
        }

        self.disconnect().await;
        self.inbound.lock().clear();

        let pruning = self.pruning.lock().take();
        if let Some(handle) = pruning {
            self.bus.unsubscribe(handle);
        }
    }

    /// Dial `peer` in the background. Success opens the outbound channel;
    /// failure schedules [`NetworkManager::reconnect`].
    pub fn connect(self: &Arc<Self>, peer: SocketAddr) {
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            debug!(%peer, "Dialing outbound peer");
            let outcome = match TcpStream::connect(peer).await {
                Ok(stream) => manager.adopt_outbound(stream).await,
                Err(source) => Err(NetworkError::Connect { addr: peer, source }),
            };
            match outcome {
                Ok(()) => info!("[bc-03] Connected to {}", peer),
                Err(e) => {
                    warn!(%peer, error = %e, "Outbound connection failed");
                    manager.reconnect(peer);
                }
            }
        });
        if let Some(previous) = self.dialing.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Close the outbound channel, wait the configured interval, then dial
    /// `peer` again. Does nothing once the manager is closed.
    pub fn reconnect(self: &Arc<Self>, peer: SocketAddr) {
        if !self.is_open() {
            return;
        }
        let manager = Arc::clone(self);
        let interval = self.config.reconnect_interval;
        let task = tokio::spawn(async move {
            manager.disconnect().await;
            debug!(%peer, ?interval, "Reconnect scheduled");
            tokio::time::sleep(interval).await;
            if manager.is_open() {
                manager.connect(peer);
            }
        });
        if let Some(previous) = self.timer.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Close and release the outbound connection.
    pub async fn disconnect(&self) {
        self.outbound.close().await;
    }

    async fn adopt_outbound(&self, stream: TcpStream) -> Result<(), NetworkError> {
        self.outbound.attach(stream).await?;
        self.outbound.open().await?;
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    info!("[bc-03] Accepted connection from {}", peer);
                    if let Err(e) = self.adopt_inbound(stream).await {
                        warn!(%peer, error = %e, "Failed to open inbound connection");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn adopt_inbound(&self, stream: TcpStream) -> Result<(), NetworkError> {
        let channel = Arc::new(SocketChannel::new(Arc::clone(&self.bus)));
        channel.attach(stream).await?;
        self.inbound.lock().push(Arc::clone(&channel));
        if let Err(e) = channel.open().await {
            self.forget_inbound(channel.id());
            return Err(e.into());
        }
        Ok(())
    }

    fn forget_inbound(&self, id: ChannelId) {
        let mut inbound = self.inbound.lock();
        let before = inbound.len();
        inbound.retain(|c| c.id() != id);
        if inbound.len() != before {
            debug!(channel = %id, remaining = inbound.len(), "Inbound connection removed");
        }
    }
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("port", &self.listening_port())
            .field("outbound", &self.config.outbound)
            .field("inbound", &self.inbound.lock().len())
            .finish()
    }
}

fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let listen = || -> std::io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(LISTEN_BACKLOG)
    };
    listen().map_err(|source| NetworkError::Bind { addr, source })
}
