//! # Dispatcher
//!
//! Drives the node from bus events: startup order, console prompts and the
//! peer block protocol.
//!
//! ## Flow
//!
//! 1. `ON_START` → subscribe channel events, take a work guard, open the block log
//! 2. Block log opened → open the console, subscribe `ON_SAVE`
//! 3. Console opened → open the network, print the port, replay the head, prompt for email
//! 4. Outbound peer opened → answer its requests (`'r'`) and accept its pushes (`'n'`)
//! 5. Inbound peer opened → request its head (`'r'`), accept its pushes (`'n'`)
//! 6. `ON_STOP` → close the console, which closes the network and then the block log
//! 7. Block log closed → unsubscribe and release the work guard

use std::sync::{Arc, Weak};

use bc_01_channel::{Channel, ChannelError, ChannelId, SocketChannel, ON_CLOSE, ON_OPEN};
use bc_02_block_log::{
    BlockLog, BlockLogError, Opcode, SaveOrigin, KEY_SIZE, ON_SAVE, VALUE_SIZE,
};
use bc_03_network::NetworkManager;
use parking_lot::Mutex;
use shared_bus::{Event, EventBus, Payload, SubscriptionHandle, WorkGuard, ON_START, ON_STOP};
use tracing::{debug, error, info, warn};

pub const EMAIL_PROMPT: &str = "Please, input your email address: ";
pub const MESSAGE_PROMPT: &str = "Type your message: ";

#[derive(Default)]
struct State {
    email: String,
    stopping: bool,
    work: Option<WorkGuard>,
    lifecycle: Vec<SubscriptionHandle>,
    channel_events: Vec<SubscriptionHandle>,
    saves: Option<SubscriptionHandle>,
}

/// Wires the console, the block log and the network together.
pub struct Dispatcher {
    bus: Arc<EventBus>,
    console: Arc<dyn Channel>,
    network: Arc<NetworkManager>,
    block_log: Arc<BlockLog>,
    state: Mutex<State>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        bus: Arc<EventBus>,
        console: Arc<dyn Channel>,
        network: Arc<NetworkManager>,
        block_log: Arc<BlockLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            console,
            network,
            block_log,
            state: Mutex::new(State::default()),
        })
    }

    /// Subscribe to the bus start and stop events.
    pub fn attach(self: &Arc<Self>) {
        let started = self.listen(&ON_START, |dispatcher, _| dispatcher.start());
        let stopping = self.listen(&ON_STOP, |dispatcher, _| dispatcher.stop());
        let stale = std::mem::replace(&mut self.state.lock().lifecycle, vec![started, stopping]);
        self.drop_subscriptions(stale);
    }

    /// Undo [`Dispatcher::attach`].
    pub fn detach(&self) {
        let handles = std::mem::take(&mut self.state.lock().lifecycle);
        self.drop_subscriptions(handles);
    }

    /// The email address entered at the prompt, empty until one is accepted.
    #[must_use]
    pub fn email(&self) -> String {
        self.state.lock().email.clone()
    }

    fn start(self: &Arc<Self>) {
        let opened = self.listen(&ON_OPEN, |dispatcher, payload| {
            if let Some(id) = ChannelId::from_payload(payload) {
                dispatcher.on_channel_opened(id);
            }
        });
        let closed = self.listen(&ON_CLOSE, |dispatcher, payload| {
            if let Some(id) = ChannelId::from_payload(payload) {
                dispatcher.on_channel_closed(id);
            }
        });
        let stale = {
            let mut state = self.state.lock();
            state.stopping = false;
            state.work = Some(self.bus.work_guard());
            std::mem::replace(&mut state.channel_events, vec![opened, closed])
        };
        self.drop_subscriptions(stale);
        debug!("[dispatch] Started, opening block log");

        let block_log = Arc::clone(&self.block_log);
        let bus = Arc::clone(&self.bus);
        self.bus.spawn(async move {
            if let Err(e) = block_log.open().await {
                error!(path = ?block_log.path(), error = %e, "[dispatch] Cannot open block log");
                bus.close();
            }
        });
    }

    fn stop(self: &Arc<Self>) {
        debug!("[dispatch] Stopping");
        self.state.lock().stopping = true;

        let dispatcher = Arc::clone(self);
        self.bus.spawn(async move {
            if dispatcher.console.is_open() {
                dispatcher.console.close().await;
            } else {
                // Nothing will cascade from the console, tear down directly.
                dispatcher.network.close().await;
                dispatcher.block_log.close().await;
            }
        });
    }

    fn on_channel_opened(self: &Arc<Self>, id: ChannelId) {
        let stopping = self.state.lock().stopping;
        if id == self.block_log.id() {
            if stopping {
                let block_log = Arc::clone(&self.block_log);
                self.bus.spawn(async move { block_log.close().await });
                return;
            }
            debug!(channel = %id, "[dispatch] Block log opened");
            let saves = self.listen(&ON_SAVE, |dispatcher, payload| {
                if let Some(origin) = payload.get::<SaveOrigin>() {
                    dispatcher.on_block_saved(*origin);
                }
            });
            if let Some(stale) = self.state.lock().saves.replace(saves) {
                self.bus.unsubscribe(stale);
            }

            let dispatcher = Arc::clone(self);
            self.bus.spawn(async move {
                if let Err(e) = dispatcher.console.open().await {
                    error!(error = %e, "[dispatch] Cannot open console");
                    dispatcher.bus.close();
                }
            });
        } else if id == self.console.id() {
            if stopping {
                return;
            }
            debug!(channel = %id, "[dispatch] Console opened");
            self.bus.spawn(Arc::clone(self).console_ready());
        } else if id == self.network.outbound().id() {
            debug!(channel = %id, "[dispatch] Outbound peer opened");
            self.bus.spawn(Arc::clone(self).serve_outbound());
        } else if let Some(peer) = self.network.find_inbound(id) {
            debug!(channel = %id, "[dispatch] Inbound peer opened");
            self.bus.spawn(Arc::clone(self).serve_inbound(peer));
        }
    }

    fn on_channel_closed(self: &Arc<Self>, id: ChannelId) {
        if id == self.console.id() {
            debug!(channel = %id, "[dispatch] Console closed");
            let saves = self.state.lock().saves.take();
            if let Some(handle) = saves {
                self.bus.unsubscribe(handle);
            }
            let network = Arc::clone(&self.network);
            let block_log = Arc::clone(&self.block_log);
            self.bus.spawn(async move {
                network.close().await;
                block_log.close().await;
            });
        } else if id == self.block_log.id() {
            debug!(channel = %id, "[dispatch] Block log closed");
            let (handles, work) = {
                let mut state = self.state.lock();
                (std::mem::take(&mut state.channel_events), state.work.take())
            };
            self.drop_subscriptions(handles);
            drop(work);
        }
    }

    fn on_block_saved(self: &Arc<Self>, origin: SaveOrigin) {
        let dispatcher = Arc::clone(self);
        self.bus.spawn(async move {
            dispatcher.announce_head().await;
            if origin == SaveOrigin::Local {
                dispatcher.prompt_message().await;
            }
        });
    }

    async fn console_ready(self: Arc<Self>) {
        if let Err(e) = self.network.open().await {
            error!(error = %e, "[dispatch] Cannot open network");
            self.bus.close();
            return;
        }
        let port = self.network.listening_port().unwrap_or_default();
        self.show(&format!("Listening on {port}\n")).await;
        self.announce_head().await;

        let dispatcher = Arc::clone(&self);
        self.bus.spawn(dispatcher.prompt_email());
    }

    /// Print the head entry and push it to every inbound peer. The genesis
    /// record is never announced.
    async fn announce_head(&self) {
        if self.block_log.head_index() == 0 {
            return;
        }
        match self.head_line().await {
            Ok(line) => self.show(&line).await,
            Err(e) => warn!(error = %e, "[dispatch] Cannot read head block"),
        }

        let push = match self.block_log.make_new_block(0).await {
            Ok(push) => push,
            Err(e) => {
                warn!(error = %e, "[dispatch] Cannot encode head block");
                return;
            }
        };
        for peer in self.network.inbound() {
            if let Err(e) = peer.write(&push).await {
                debug!(channel = %peer.id(), error = %e, "[dispatch] Push failed, dropping peer");
                peer.close().await;
            }
        }
    }

    async fn head_line(&self) -> Result<String, BlockLogError> {
        let block = self.block_log.head_block().await?;
        let erase = "\u{8}".repeat(MESSAGE_PROMPT.len());
        Ok(format!(
            "{erase}{} {}>{}\n",
            block.timestamp,
            block.key_str(),
            block.value_str()
        ))
    }

    async fn prompt_email(self: Arc<Self>) {
        loop {
            self.show(EMAIL_PROMPT).await;
            let Some(email) = self.read_console().await else {
                return;
            };
            if is_valid_input(&email, KEY_SIZE) {
                debug!(%email, "[dispatch] Email accepted");
                self.state.lock().email = email;
                break;
            }
        }
        self.prompt_message().await;
    }

    /// Ask for one message and append it. A successful store re-prompts
    /// through `ON_SAVE`.
    async fn prompt_message(&self) {
        loop {
            self.show(MESSAGE_PROMPT).await;
            let Some(message) = self.read_console().await else {
                return;
            };
            if !is_valid_input(&message, VALUE_SIZE) {
                continue;
            }
            let email = self.email();
            match self.block_log.store(&email, &message).await {
                Ok(block) => {
                    debug!(index = block.index, "[dispatch] Message stored");
                    return;
                }
                Err(e) => warn!(error = %e, "[dispatch] Cannot store message"),
            }
        }
    }

    /// One console line. `None` ends the prompt loop; input ending or
    /// failing also closes the bus.
    async fn read_console(&self) -> Option<String> {
        match self.console.read(0).await {
            Ok(line) => Some(String::from_utf8_lossy(&line).into_owned()),
            Err(e) if e.is_aborted() => None,
            Err(e) if e.is_eof() => {
                info!("[dispatch] Console input ended");
                self.bus.close();
                None
            }
            Err(e) => {
                warn!(error = %e, "[dispatch] Console read failed");
                self.bus.close();
                None
            }
        }
    }

    async fn show(&self, text: &str) {
        if let Err(e) = self.console.write(text.as_bytes()).await {
            debug!(error = %e, "[dispatch] Console write failed");
        }
    }

    /// Answer the peer this node dialed until the connection drops, then
    /// schedule a reconnect.
    async fn serve_outbound(self: Arc<Self>) {
        let server = self.network.outbound();
        let peer = server.remote_addr();
        let error = loop {
            if let Err(e) = self.read_server_request(&server).await {
                break e;
            }
        };
        if error.is_aborted() {
            return;
        }
        info!(peer = ?peer, error = %error, "[dispatch] Lost outbound peer");
        server.close().await;
        if let Some(addr) = self.network.outbound_addr() {
            self.network.reconnect(addr);
        }
    }

    async fn read_server_request(&self, server: &SocketChannel) -> Result<(), BlockLogError> {
        let opcode = read_opcode(server).await?;
        match opcode {
            Some(Opcode::Request) => {
                let data = read_payload(server, Opcode::Request).await?;
                let index = BlockLog::extract_block_index(&data)?;
                match self.block_log.make_block_response(index).await {
                    Ok(response) => server.write(&response).await?,
                    Err(e) => warn!(index, error = %e, "[dispatch] Cannot answer block request"),
                }
            }
            Some(Opcode::NewBlock) => self.accept_push(server).await?,
            Some(Opcode::Response) | None => {}
        }
        Ok(())
    }

    /// Ask a freshly accepted peer for its head, then take its pushes until
    /// it goes away.
    async fn serve_inbound(self: Arc<Self>, client: Arc<SocketChannel>) {
        let request = BlockLog::make_block_request(0);
        let result = match client.write(&request).await {
            Ok(()) => loop {
                if let Err(e) = self.read_client_response(&client).await {
                    break e;
                }
            },
            Err(e) => e.into(),
        };
        if result.is_aborted() {
            return;
        }
        if is_disconnect(&result) {
            info!(peer = ?client.remote_addr(), "[dispatch] Peer disconnected");
        } else {
            warn!(peer = ?client.remote_addr(), error = %result, "[dispatch] Peer failed");
        }
        client.close().await;
    }

    async fn read_client_response(&self, client: &SocketChannel) -> Result<(), BlockLogError> {
        match read_opcode(client).await? {
            Some(Opcode::Response) => {
                // TODO: reconcile the peer's head with the local chain before accepting pushes.
                let _ = read_payload(client, Opcode::Response).await?;
            }
            Some(Opcode::NewBlock) => self.accept_push(client).await?,
            Some(Opcode::Request) | None => {}
        }
        Ok(())
    }

    async fn accept_push(&self, channel: &SocketChannel) -> Result<(), BlockLogError> {
        let raw = read_payload(channel, Opcode::NewBlock).await?;
        let block = self.block_log.save(&raw).await?;
        debug!(channel = %channel.id(), index = block.index, "[dispatch] Saved pushed block");
        Ok(())
    }

    /// Subscribe through a weak reference so the bus never keeps the
    /// dispatcher alive.
    fn listen<F>(self: &Arc<Self>, event: &Event, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Arc<Self>, &Payload) + Send + Sync + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe(event, move |payload| match weak.upgrade() {
            Some(dispatcher) => {
                handler(&dispatcher, payload);
                false
            }
            None => true,
        })
    }

    fn drop_subscriptions(&self, handles: Vec<SubscriptionHandle>) {
        for handle in handles {
            self.bus.unsubscribe(handle);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("console", &self.console.id())
            .field("block_log", &self.block_log.id())
            .field("network", &self.network)
            .finish()
    }
}

/// Read one opcode byte. Unknown opcodes come back as `None`.
async fn read_opcode(channel: &SocketChannel) -> Result<Option<Opcode>, ChannelError> {
    let byte = channel.read(1).await?;
    let opcode = byte.first().copied().and_then(Opcode::from_byte);
    if opcode.is_none() {
        debug!(channel = %channel.id(), byte = ?byte, "[dispatch] Ignoring unknown opcode");
    }
    Ok(opcode)
}

async fn read_payload(channel: &SocketChannel, opcode: Opcode) -> Result<Vec<u8>, ChannelError> {
    channel.read(opcode.payload_size()).await
}

fn is_valid_input(text: &str, limit: usize) -> bool {
    !text.is_empty() && text.len() <= limit
}

fn is_disconnect(error: &BlockLogError) -> bool {
    matches!(error, BlockLogError::Channel(e) if e.is_eof())
}

#[cfg(test)]
mod tests;
