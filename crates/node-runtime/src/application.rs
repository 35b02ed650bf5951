//! # Application
//!
//! Assembles one chat node and runs it until the bus shuts down.
//!
//! ## Startup Sequence
//!
//! 1. Build the event bus, block log, network manager and console
//! 2. Attach the dispatcher to the bus start/stop events
//! 3. Schedule `bus.open()` and run the worker pool
//! 4. Route SIGINT/SIGTERM into `bus.close()`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bc_01_channel::{Channel, Console};
use bc_02_block_log::BlockLog;
use bc_03_network::NetworkManager;
use shared_bus::EventBus;
use tracing::{debug, info, warn};

use crate::container::NodeConfig;
use crate::handlers::Dispatcher;

/// How long the runtime waits for stragglers, such as a blocked stdin
/// read, once the bus has stopped.
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// One fully wired node.
pub struct Application {
    config: NodeConfig,
    bus: Arc<EventBus>,
    block_log: Arc<BlockLog>,
    network: Arc<NetworkManager>,
    dispatcher: Arc<Dispatcher>,
}

impl Application {
    /// Wire a node around `console`. Fails if the outbound peer does not
    /// resolve.
    pub fn new(config: NodeConfig, console: Arc<dyn Channel>, bus: Arc<EventBus>) -> Result<Self> {
        let manager_config = config
            .manager_config()
            .context("invalid network configuration")?;
        let block_log = Arc::new(BlockLog::new(
            Arc::clone(&bus),
            config.storage.blockchain_path(),
        ));
        let network = Arc::new(NetworkManager::new(Arc::clone(&bus), manager_config));
        let dispatcher = Dispatcher::new(
            Arc::clone(&bus),
            console,
            Arc::clone(&network),
            Arc::clone(&block_log),
        );
        Ok(Self {
            config,
            bus,
            block_log,
            network,
            dispatcher,
        })
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    #[must_use]
    pub fn block_log(&self) -> &Arc<BlockLog> {
        &self.block_log
    }

    #[must_use]
    pub fn network(&self) -> &Arc<NetworkManager> {
        &self.network
    }

    /// Run until the bus drains. Returns once every component is closed.
    pub async fn run(&self) -> Result<()> {
        info!("===========================================");
        info!("  bitchat node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");
        info!("Block log: {}", self.config.storage.blockchain_path().display());
        match &self.config.network.server {
            Some(server) => info!("Outbound peer: {}", server),
            None => info!("Outbound peer: none, listening only"),
        }

        self.dispatcher.attach();
        let bus = Arc::clone(&self.bus);
        self.bus.do_later(move || {
            bus.open();
        });

        let signals = tokio::spawn(forward_signals(Arc::clone(&self.bus)));
        self.bus.run(self.config.runtime.workers).await;
        signals.abort();
        self.dispatcher.detach();

        info!("Node stopped");
        Ok(())
    }
}

/// Build the tokio runtime and run a node on the process console.
pub fn run(config: NodeConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.workers.max(1))
        .thread_name("bitchat-worker")
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    let outcome: Result<()> = runtime.block_on(async {
        let bus = Arc::new(EventBus::new());
        let console: Arc<dyn Channel> = Arc::new(Console::new(Arc::clone(&bus)));
        Application::new(config, console, bus)?.run().await
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    outcome
}

/// Turn the first termination signal into `bus.close()`. A second one stops
/// the bus without draining.
async fn forward_signals(bus: Arc<EventBus>) {
    if let Err(e) = termination().await {
        warn!(error = %e, "Cannot listen for termination signals");
        return;
    }
    info!("Termination requested, closing");
    bus.close();

    if termination().await.is_ok() {
        warn!("Second termination request, stopping immediately");
        bus.shutdown();
    }
}

#[cfg(unix)]
async fn termination() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => {
            debug!("SIGTERM received");
            Ok(())
        }
    }
}

#[cfg(not(unix))]
async fn termination() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
