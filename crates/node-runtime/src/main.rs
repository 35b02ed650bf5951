//! # bitchat
//!
//! Peer-to-peer chat node. Messages typed at the console are appended to a
//! hash-chained block log and pushed to every connected peer.
//!
//! ## Exit Codes
//!
//! - `0`: clean shutdown, or `--help`
//! - `1`: invalid configuration
//! - `2`: usage error (from clap) or runtime failure

use std::process::ExitCode;

use clap::Parser;
use node_runtime::{application, logging, Cli, NodeConfig};
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = NodeConfig::default();
    if let Err(e) = config.load_env() {
        eprintln!("bitchat: {e}");
        return ExitCode::from(1);
    }
    cli.apply(&mut config);

    let _log_guard = match logging::init_logging(&config.storage.log_path()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("bitchat: {e:#}");
            return ExitCode::from(1);
        }
    };

    if let Some(server) = &config.network.server {
        if let Err(e) = server.resolve() {
            error!(error = %e, "Invalid outbound peer");
            eprintln!("bitchat: {e}");
            return ExitCode::from(1);
        }
    }

    match application::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Node failed");
            eprintln!("bitchat: {e:#}");
            ExitCode::from(2)
        }
    }
}
