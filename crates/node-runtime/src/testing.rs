//! Test doubles for driving a node without a terminal.
//!
//! Enabled by the `test-utils` feature and in this crate's own tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bc_01_channel::{Channel, ChannelError, ChannelId, ON_CLOSE, ON_OPEN};
use parking_lot::Mutex;
use shared_bus::{EventBus, Payload};
use tokio::sync::{mpsc, watch, Notify};

/// A console fed from a script. Lines typed with [`ScriptedConsole::type_line`]
/// are returned by `read(0)`, and everything written is captured.
pub struct ScriptedConsole {
    id: ChannelId,
    bus: Arc<EventBus>,
    open: AtomicBool,
    closed: watch::Sender<bool>,
    typed: Mutex<Option<mpsc::UnboundedSender<String>>>,
    lines: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    output: Mutex<String>,
    written: Notify,
}

impl ScriptedConsole {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        let (typed, lines) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: ChannelId::next(),
            bus,
            open: AtomicBool::new(false),
            closed,
            typed: Mutex::new(Some(typed)),
            lines: tokio::sync::Mutex::new(lines),
            output: Mutex::new(String::new()),
            written: Notify::new(),
        })
    }

    /// Queue one line of operator input.
    pub fn type_line(&self, line: &str) {
        if let Some(typed) = self.typed.lock().as_ref() {
            let _ = typed.send(line.to_string());
        }
    }

    /// Close the input: once queued lines are consumed, reads hit end of file.
    pub fn end_input(&self) {
        self.typed.lock().take();
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.output.lock().clone()
    }

    /// Number of times `text` occurs in the output.
    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        self.output.lock().matches(text).count()
    }

    /// Wait until `text` has been written at least `times` times.
    pub async fn wait_for(&self, text: &str, times: usize, limit: Duration) -> bool {
        let waiting = async {
            loop {
                let notified = self.written.notified();
                if self.count(text) >= times {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, waiting).await.is_ok()
    }

    async fn next_line(&self) -> Result<String, ChannelError> {
        let mut closed = self.closed.subscribe();
        let mut lines = self.lines.lock().await;
        let aborted = async move {
            loop {
                if *closed.borrow_and_update() {
                    return;
                }
                if closed.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            line = lines.recv() => {
                line.ok_or_else(|| ChannelError::Io(io::ErrorKind::UnexpectedEof.into()))
            }
            () = aborted => Err(ChannelError::Aborted),
        }
    }
}

#[async_trait]
impl Channel for ScriptedConsole {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn open(&self) -> Result<(), ChannelError> {
        self.closed.send_replace(false);
        self.open.store(true, Ordering::SeqCst);
        self.bus.notify(&ON_OPEN, Payload::new(self.id));
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.bus.perform(&ON_CLOSE, Payload::new(self.id));
        }
        self.closed.send_replace(true);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn read(&self, _size: usize) -> Result<Vec<u8>, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen(self.id));
        }
        self.next_line().await.map(String::into_bytes)
    }

    async fn write(&self, data: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::NotOpen(self.id));
        }
        self.output.lock().push_str(&String::from_utf8_lossy(data));
        self.written.notify_waiters();
        Ok(())
    }
}

impl std::fmt::Debug for ScriptedConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedConsole")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
