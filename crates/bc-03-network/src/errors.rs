use std::io;
use std::net::SocketAddr;

use bc_01_channel::ChannelError;
use thiserror::Error;

/// Errors raised while listening for or dialing peers.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
