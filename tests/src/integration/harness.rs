//! In-process node driven through a scripted console.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use node_runtime::container::NodeConfig;
use node_runtime::handlers::{EMAIL_PROMPT, MESSAGE_PROMPT};
use node_runtime::testing::ScriptedConsole;
use node_runtime::Application;
use shared_bus::EventBus;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestNode {
    pub app: Arc<Application>,
    pub console: Arc<ScriptedConsole>,
    running: JoinHandle<()>,
    _dir: TempDir,
}

impl TestNode {
    /// Start a node, optionally dialing `server`, and wait for its email
    /// prompt.
    pub async fn start(name: &str, server: Option<SocketAddr>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.storage.name = name.to_string();
        config.runtime.workers = 2;
        config.network.reconnect_interval = Duration::from_millis(100);
        config.network.server = server.map(|addr| addr.to_string().parse().unwrap());

        let bus = Arc::new(EventBus::new());
        let console = ScriptedConsole::new(Arc::clone(&bus));
        let app = Arc::new(Application::new(config, console.clone(), bus).unwrap());
        let running = {
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                app.run().await.unwrap();
            })
        };
        let node = Self {
            app,
            console,
            running,
            _dir: dir,
        };
        assert!(
            node.console.wait_for(EMAIL_PROMPT, 1, WAIT).await,
            "{name} never prompted, output: {:?}",
            node.console.output()
        );
        node
    }

    pub fn addr(&self) -> SocketAddr {
        let port = self.app.network().listening_port().unwrap();
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Log in as `email` and wait for the message prompt.
    pub async fn login(&self, email: &str) {
        self.console.type_line(email);
        assert!(self.console.wait_for(MESSAGE_PROMPT, 1, WAIT).await);
    }

    /// Type a message and wait until it has been stored and re-prompted.
    pub async fn say(&self, message: &str) {
        let prompts = self.console.count(MESSAGE_PROMPT);
        self.console.type_line(message);
        assert!(self.console.wait_for(MESSAGE_PROMPT, prompts + 1, WAIT).await);
    }

    pub async fn stop(self) {
        self.app.bus().close();
        tokio::time::timeout(WAIT, self.running)
            .await
            .expect("node did not drain")
            .unwrap();
    }
}

/// Poll `condition` until it holds or [`WAIT`] passes.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
