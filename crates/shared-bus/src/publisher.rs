//! # Event Bus
//!
//! Subscription registry plus the scheduler that runs deliveries.
//!
//! ## Delivery Modes
//!
//! | Call | Where the callbacks run |
//! |------|-------------------------|
//! | [`EventBus::notify`] | later, one queued task per subscriber |
//! | [`EventBus::perform`] | inline when already on the scheduler, queued otherwise |
//!
//! In both modes the subscriber list is snapshotted under the table lock
//! and callbacks run with the lock released, so a callback may subscribe,
//! unsubscribe or publish without deadlocking. Invocations of one
//! subscription are serialized, so a callback that returns `true` never
//! runs again, even with several deliveries queued on different workers.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::events::{Event, Payload, ON_START, ON_STOP};
use crate::scheduler::{BoxFuture, Scheduler, Task, WorkGuard};
use crate::subscriber::{Callback, SubscriptionHandle, SubscriptionTable};

/// Upper bound on the teardown that follows [`EventBus::close`].
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Publish/subscribe hub and task scheduler.
///
/// Share it as `Arc<EventBus>`; [`EventBus::run`] needs the `Arc` to hand
/// clones to its workers.
pub struct EventBus {
    subscriptions: Mutex<SubscriptionTable>,
    scheduler: Scheduler,
    drain_timeout: Duration,
}

impl EventBus {
    /// Create a bus with the default drain timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Create a bus whose shutdown waits at most `drain_timeout` for
    /// in-flight work after [`EventBus::close`].
    #[must_use]
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            subscriptions: Mutex::new(SubscriptionTable::default()),
            scheduler: Scheduler::new(),
            drain_timeout,
        }
    }

    /// Register `callback` for `event`. The callback returns `true` to be
    /// removed after it runs.
    pub fn subscribe<F>(&self, event: &Event, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let handle = self.subscriptions.lock().insert(*event, callback);
        trace!(event = %event, id = handle.id(), "Subscribed");
        handle
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self
            .subscriptions
            .lock()
            .remove(handle.event().tag(), handle.id());
        trace!(event = %handle.event(), id = handle.id(), removed, "Unsubscribed");
        removed
    }

    /// Number of live registrations for `event`.
    #[must_use]
    pub fn subscribers_count(&self, event: &Event) -> usize {
        self.subscriptions.lock().count(event.tag())
    }

    /// Queue one delivery per current subscriber. Returns whether anyone
    /// was subscribed.
    pub fn notify(&self, event: &Event, payload: Payload) -> bool {
        let targets = self.subscriptions.lock().snapshot(event.tag());
        trace!(event = %event, subscribers = targets.len(), "Notify");
        for subscription in &targets {
            self.scheduler.enqueue(Task::Deliver {
                tag: event.tag(),
                subscription: *subscription,
                payload: payload.clone(),
            });
        }
        !targets.is_empty()
    }

    /// Deliver synchronously when called from the scheduler, otherwise
    /// behave like [`EventBus::notify`].
    pub fn perform(&self, event: &Event, payload: Payload) -> bool {
        if !self.scheduler.in_context() {
            return self.notify(event, payload);
        }
        let targets = self.subscriptions.lock().snapshot(event.tag());
        trace!(event = %event, subscribers = targets.len(), "Perform");
        for subscription in &targets {
            self.deliver(event.tag(), *subscription, &payload);
        }
        !targets.is_empty()
    }

    /// Queue an arbitrary callback.
    pub fn do_later<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.enqueue(Task::Call(Box::new(job)));
    }

    /// Run a future on the bus. It counts as pending work until it ends and
    /// is cancelled when the bus stops.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scheduler.enqueue(Task::Spawn(Box::pin(future)));
    }

    /// Keep [`EventBus::run`] alive while the returned guard is held.
    pub fn work_guard(&self) -> WorkGuard {
        self.scheduler.guard()
    }

    /// Queued plus in-flight tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// Announce the start of the run to every component.
    pub fn open(&self) -> bool {
        info!("Event bus open");
        self.notify(&ON_START, Payload::none())
    }

    /// Tell every component to stop, then schedule shutdown. Work already
    /// in flight gets up to the drain timeout to finish.
    pub fn close(&self) {
        info!("Event bus closing");
        self.perform(&ON_STOP, Payload::none());
        self.scheduler.enqueue(Task::Shutdown);
    }

    /// Stop the scheduler immediately. Queued tasks are discarded and
    /// spawned futures are cancelled.
    pub fn shutdown(&self) {
        if self.scheduler.stop() {
            debug!(pending = self.scheduler.pending(), "Scheduler stopped");
        }
    }

    /// True once the scheduler has stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    /// Process tasks on `workers` tasks until the bus is shut down or runs
    /// out of work. Returns immediately when called with nothing queued and
    /// no [`WorkGuard`] alive.
    pub async fn run(self: &Arc<Self>, workers: usize) {
        let workers = workers.max(1);
        debug!(workers, "Scheduler running");
        let handles: Vec<_> = (0..workers)
            .map(|worker| tokio::spawn(Arc::clone(self).work(worker)))
            .collect();

        let mut deadline: Option<Instant> = None;
        loop {
            if self.scheduler.is_stopped() || self.scheduler.is_finished() {
                break;
            }
            if deadline.is_none() && self.scheduler.is_draining() {
                deadline = Some(Instant::now() + self.drain_timeout);
            }
            let expiry = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                () = self.scheduler.changed() => {}
                () = expiry => {
                    warn!(pending = self.scheduler.pending(), "Drain timed out, forcing shutdown");
                    break;
                }
            }
        }

        self.shutdown();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler worker failed");
            }
        }
        debug!("Scheduler finished");
    }

    async fn work(self: Arc<Self>, worker: usize) {
        trace!(worker, "Worker started");
        while let Some(task) = self.scheduler.next().await {
            self.execute(task);
        }
        trace!(worker, "Worker stopped");
    }

    fn execute(self: &Arc<Self>, task: Task) {
        match task {
            Task::Deliver {
                tag,
                subscription,
                payload,
            } => {
                self.scheduler
                    .scoped(|| guarded(|| self.deliver(tag, subscription, &payload)));
                self.scheduler.finish();
            }
            Task::Call(job) => {
                self.scheduler.scoped(|| guarded(job));
                self.scheduler.finish();
            }
            Task::Spawn(future) => self.launch(future),
            Task::Shutdown => {
                debug!("Draining before shutdown");
                self.scheduler.begin_drain();
                self.scheduler.finish();
            }
        }
    }

    fn launch(self: &Arc<Self>, future: BoxFuture) {
        let bus = Arc::clone(self);
        let stop = self.scheduler.stop_signal();
        let task = tokio::spawn(self.scheduler.scope_future(future));
        let abort = task.abort_handle();
        tokio::spawn(async move {
            tokio::select! {
                outcome = task => {
                    if let Err(e) = outcome {
                        if e.is_panic() {
                            error!("Spawned task panicked");
                        }
                    }
                }
                () = stop => abort.abort(),
            }
            bus.scheduler.finish();
        });
    }

    fn deliver(&self, tag: u64, subscription: u64, payload: &Payload) {
        let found = self.subscriptions.lock().callback(tag, subscription);
        let Some((callback, gate)) = found else {
            trace!(tag, subscription, "Subscription gone before delivery");
            return;
        };
        let _serial = gate.lock();
        // An earlier delivery may have unsubscribed it while we waited.
        if !self.subscriptions.lock().contains(tag, subscription) {
            trace!(tag, subscription, "Subscription removed while waiting");
            return;
        }
        if (*callback)(payload) {
            self.subscriptions.lock().remove(tag, subscription);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &*self.subscriptions.lock())
            .field("pending", &self.scheduler.pending())
            .field("stopped", &self.scheduler.is_stopped())
            .finish()
    }
}

fn guarded(job: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Scheduled task panicked");
    }
}
