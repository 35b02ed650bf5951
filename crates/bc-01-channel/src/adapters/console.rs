//! Console channel: standard input for reads, standard output for writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shared_bus::{EventBus, Payload};
use tracing::debug;

use super::file::{FileChannel, FileEndpoint};
use crate::domain::{ChannelError, ChannelId, ON_CLOSE, ON_OPEN};
use crate::ports::Channel;

pub struct Console {
    id: ChannelId,
    bus: Arc<EventBus>,
    input: FileChannel,
    output: FileChannel,
    open: AtomicBool,
}

impl Console {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            id: ChannelId::next(),
            input: FileChannel::new(Arc::clone(&bus), FileEndpoint::StdIn),
            output: FileChannel::new(Arc::clone(&bus), FileEndpoint::StdOut),
            bus,
            open: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Channel for Console {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn open(&self) -> Result<(), ChannelError> {
        self.input.bind().await?;
        if let Err(e) = self.output.bind().await {
            self.input.release().await;
            return Err(e);
        }
        self.open.store(true, Ordering::SeqCst);
        debug!(channel = %self.id, "Console open");
        self.bus.notify(&ON_OPEN, Payload::new(self.id));
        Ok(())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.bus.perform(&ON_CLOSE, Payload::new(self.id));
        }
        self.input.release().await;
        self.output.release().await;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn read(&self, size: usize) -> Result<Vec<u8>, ChannelError> {
        self.input.read(size).await
    }

    async fn write(&self, data: &[u8]) -> Result<(), ChannelError> {
        self.output.write(data).await
    }
}
