//! # Task Scheduler
//!
//! The queue every deferred delivery, callback and spawned future goes
//! through, together with the bookkeeping that decides when a run is over.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──→ pending += 1 ──→ worker executes ──→ pending -= 1
//!                                    │
//!                    Spawn ─────────┘ (pending held until the future ends)
//!
//! run() exits when: stopped
//!                or pending == 0 and no WorkGuard is alive
//!                or draining and pending == 0
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};

use crate::events::Payload;

/// Boxed future accepted by [`crate::EventBus::spawn`].
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_SCHEDULER: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CONTEXT: u64;
}

pub(crate) enum Task {
    /// Invoke one subscription. Resolved when the task runs, so a
    /// subscription removed in the meantime is skipped.
    Deliver {
        tag: u64,
        subscription: u64,
        payload: Payload,
    },
    Call(Job),
    Spawn(BoxFuture),
    Shutdown,
}

/// Counters shared with [`WorkGuard`]s.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pending: AtomicUsize,
    guards: AtomicUsize,
    draining: AtomicBool,
    changed: Notify,
}

impl Counters {
    fn wake(&self) {
        self.changed.notify_one();
    }
}

pub(crate) struct Scheduler {
    id: u64,
    sender: mpsc::UnboundedSender<Task>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Task>>,
    counters: Arc<Counters>,
    stopped: watch::Sender<bool>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stopped, _) = watch::channel(false);
        Self {
            id: NEXT_SCHEDULER.fetch_add(1, Ordering::Relaxed),
            sender,
            queue: tokio::sync::Mutex::new(receiver),
            counters: Arc::new(Counters::default()),
            stopped,
        }
    }

    /// True while the caller runs on one of this scheduler's workers or
    /// inside a future it spawned.
    pub(crate) fn in_context(&self) -> bool {
        CONTEXT.try_with(|id| *id == self.id).unwrap_or(false)
    }

    pub(crate) fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        CONTEXT.sync_scope(self.id, f)
    }

    pub(crate) fn scope_future(&self, future: BoxFuture) -> impl Future<Output = ()> + Send {
        CONTEXT.scope(self.id, future)
    }

    pub(crate) fn enqueue(&self, task: Task) {
        if self.is_stopped() {
            return;
        }
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(task).is_err() {
            self.finish();
        }
    }

    /// Pops the next task, or `None` once the scheduler is stopped.
    pub(crate) async fn next(&self) -> Option<Task> {
        let stop = stopped(self.stopped.subscribe());
        let mut queue = tokio::select! {
            biased;
            () = stop => return None,
            queue = self.queue.lock() => queue,
        };
        let stop = stopped(self.stopped.subscribe());
        tokio::select! {
            biased;
            () = stop => None,
            task = queue.recv() => task,
        }
    }

    pub(crate) fn finish(&self) {
        if self.counters.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counters.wake();
        }
    }

    pub(crate) fn begin_drain(&self) {
        self.counters.draining.store(true, Ordering::SeqCst);
        self.counters.wake();
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.counters.draining.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) -> bool {
        let was_stopped = self.stopped.send_replace(true);
        self.counters.wake();
        !was_stopped
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub(crate) fn stop_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        stopped(self.stopped.subscribe())
    }

    /// Nothing queued or in flight.
    pub(crate) fn is_quiet(&self) -> bool {
        self.counters.pending.load(Ordering::SeqCst) == 0
    }

    /// Quiet and either unguarded or draining.
    pub(crate) fn is_finished(&self) -> bool {
        self.is_quiet()
            && (self.is_draining() || self.counters.guards.load(Ordering::SeqCst) == 0)
    }

    pub(crate) async fn changed(&self) {
        self.counters.changed.notified().await;
    }

    pub(crate) fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn guard(&self) -> WorkGuard {
        self.counters.guards.fetch_add(1, Ordering::SeqCst);
        WorkGuard {
            counters: Arc::clone(&self.counters),
        }
    }
}

/// Resolves once the watched flag turns true. Never resolves if the sender
/// goes away first.
async fn stopped(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Keeps [`crate::EventBus::run`] alive while held, even with an empty queue.
#[derive(Debug)]
#[must_use = "the run only stays alive while the guard is held"]
pub struct WorkGuard {
    counters: Arc<Counters>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.counters.guards.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counters.wake();
        }
    }
}
