//! Command line interface of the `bitchat` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::container::{NodeConfig, ServerAddr};

/// Peer-to-peer chat over a hash-chained message log.
#[derive(Debug, Clone, Parser)]
#[command(name = "bitchat", version, about)]
pub struct Cli {
    /// Peer to connect to, as host:port.
    #[arg(short, long, value_name = "HOST:PORT")]
    pub server: Option<ServerAddr>,

    /// Prefix of the block log and log files. Defaults to the executable name.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory for the block log and log files.
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Port to accept peers on. 0 picks a free port.
    #[arg(short, long, value_name = "PORT")]
    pub listen_port: Option<u16>,
}

impl Cli {
    /// Overlay the flags that were given on `config`.
    pub fn apply(self, config: &mut NodeConfig) {
        if let Some(server) = self.server {
            config.network.server = Some(server);
        }
        if let Some(name) = self.name.filter(|n| !n.is_empty()) {
            config.storage.name = name;
        }
        if let Some(dir) = self.data_dir {
            config.storage.data_dir = dir;
        }
        if let Some(port) = self.listen_port {
            config.network.listen_port = port;
        }
    }
}
