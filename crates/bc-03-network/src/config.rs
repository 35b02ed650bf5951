//! Network manager configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Delay between a failed dial and the next attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Listen backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Address the acceptor binds. Port 0 picks an ephemeral port.
    pub listen_addr: SocketAddr,
    /// The single outbound peer, if any.
    pub outbound: Option<SocketAddr>,
    /// Fixed retry interval, no backoff.
    pub reconnect_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            outbound: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ManagerConfig {
    /// Listen on loopback only, for tests and local tooling.
    #[must_use]
    pub fn loopback() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_outbound(mut self, peer: SocketAddr) -> Self {
        self.outbound = Some(peer);
        self
    }

    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }
}
