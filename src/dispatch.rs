//! Deferred resolution on a bounded wait pool.
//!
//! A request handler must not block on a long poll. [`WaitPool::subscribe`]
//! runs the fast path on the caller's thread and, only if that withholds,
//! hands the slow path to a fixed set of wait workers. The caller gets a
//! [`PendingOutcome`] right away and collects the single outcome later.
//!
//! The generation observed on the fast path travels with the job, so changes
//! that happen while the job sits in the queue are not missed, and the
//! deadline is fixed at subscribe time. The handle keeps the same generation:
//! if the deadline passes before a worker answers, it re-evaluates the holder
//! itself, so a subscription stuck behind busy workers still sees every
//! relevant change that happened within its budget.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::content::BroadcastContent;
use crate::coordinator::{fast_path, settle, slow_path, FastPath, Outcome, Subscription};
use crate::error::{BroadcastError, BroadcastResult, ExecutionError};
use crate::holder::ContentHolder;
use crate::serializer::Serializer;

/// Unique identifier for a subscription, used for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Wait pool configuration.
#[derive(Debug, Clone)]
pub struct WaitPoolConfig {
    /// Number of wait workers, i.e. slow-path subscriptions blocked at once.
    pub workers: usize,
    /// Maximum queued slow-path subscriptions beyond the busy workers.
    pub queue_capacity: usize,
}

impl Default for WaitPoolConfig {
    fn default() -> Self {
        Self {
            workers: 64,
            queue_capacity: 1024,
        }
    }
}

type WaitJob = Box<dyn FnOnce() + Send + 'static>;

/// Non-blocking re-evaluation run by a handle whose deadline passed first.
type SettleFn<C> = Box<dyn FnOnce() -> BroadcastResult<Outcome<C>> + Send + 'static>;

/// Fixed set of threads that run slow-path waits.
pub struct WaitPool {
    tx: Sender<WaitJob>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WaitPool {
    /// Starts the wait workers.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread can not be spawned.
    #[must_use]
    pub fn new(config: WaitPoolConfig) -> Self {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<WaitJob>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<WaitJob> = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("longpoll-wait-{idx}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        // A panicking transform or serializer drops the job's
                        // reply sender; the subscriber sees `WaitInterrupted`.
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!(worker = idx, "wait job panicked");
                        }
                    }
                })
                .expect("failed to spawn longpoll wait worker");
            handles.push(handle);
        }

        Self {
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    /// Subscribes to `holder`.
    ///
    /// The fast path runs on the calling thread; fast-path outcomes are
    /// already resolved in the returned handle.
    ///
    /// # Errors
    ///
    /// - `SerializationFailed` from the fast-path evaluation.
    /// - `QueueFull` if every worker is busy and the queue is at capacity.
    /// - `Disconnected` if the pool is shutting down.
    pub fn subscribe<C, S>(
        &self,
        holder: &Arc<ContentHolder<C, S>>,
        subscription: Subscription<C>,
    ) -> BroadcastResult<PendingOutcome<C>>
    where
        C: BroadcastContent,
        S: Serializer<C> + 'static,
    {
        let id = SubscriptionId::new();
        let deadline = subscription.deadline();
        let (reply_tx, reply_rx) = bounded::<BroadcastResult<Outcome<C>>>(1);

        let generation = match fast_path(holder.as_ref(), &subscription)? {
            FastPath::Resolved(outcome) => {
                debug!(subscription = %id, resolved = true, "subscription answered on fast path");
                let _ = reply_tx.send(Ok(outcome));
                return Ok(PendingOutcome::new(id, deadline, reply_rx, None));
            }
            FastPath::Pending { generation } => generation,
        };

        let settle_fn: SettleFn<C> = {
            let holder = Arc::clone(holder);
            let subscription = subscription.clone();
            Box::new(move || settle(holder.as_ref(), &subscription, generation))
        };

        let holder = Arc::clone(holder);
        let job: WaitJob = Box::new(move || {
            let result = slow_path(holder.as_ref(), &subscription, generation, deadline);
            match &result {
                Ok(outcome) => debug!(subscription = %id, ready = outcome.is_ready(), closed = outcome.is_closed(), "subscription resolved"),
                Err(e) => warn!(subscription = %id, error = %e, "subscription failed"),
            }
            let _ = reply_tx.send(result);
        });

        match self.tx.try_send(job) {
            Ok(()) => {
                debug!(subscription = %id, generation, "subscription deferred to wait pool");
                Ok(PendingOutcome::new(id, deadline, reply_rx, Some(settle_fn)))
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscription = %id, capacity = self.queue_capacity, "wait pool queue full");
                Err(ExecutionError::QueueFull {
                    capacity: self.queue_capacity,
                }
                .into())
            }
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected {
                path: "wait_pool".to_string(),
            }
            .into()),
        }
    }

    /// Number of wait workers.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting work and joins the workers once queued waits finish.
    ///
    /// Each queued wait is bounded by its own deadline (or by holder
    /// termination), so this returns after the longest outstanding budget.
    pub fn shutdown(self) {
        let Self { tx, workers, .. } = self;
        drop(tx);
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Default for WaitPool {
    fn default() -> Self {
        Self::new(WaitPoolConfig::default())
    }
}

impl fmt::Debug for WaitPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitPool")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .field("queued", &self.tx.len())
            .finish()
    }
}

// Dropping the pool without `shutdown` detaches the workers: they drain the
// queue and exit once the channel is closed.

/// Handle to a subscription that may not have resolved yet.
///
/// Yields exactly one outcome. Once the subscription's deadline has passed
/// without a result the handle resolves the subscription itself, even if the
/// job is still queued behind busy workers: a relevant change since
/// subscribing is `Ready`, termination is `Closed`, anything else `TimedOut`.
pub struct PendingOutcome<C> {
    id: SubscriptionId,
    deadline: Option<Instant>,
    rx: Receiver<BroadcastResult<Outcome<C>>>,
    settle: Option<SettleFn<C>>,
    taken: bool,
}

impl<C> PendingOutcome<C> {
    fn new(
        id: SubscriptionId,
        deadline: Option<Instant>,
        rx: Receiver<BroadcastResult<Outcome<C>>>,
        settle: Option<SettleFn<C>>,
    ) -> Self {
        Self {
            id,
            deadline,
            rx,
            settle,
            taken: false,
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns true if an outcome can be taken without blocking.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.taken && (!self.rx.is_empty() || self.expired())
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn interrupted() -> BroadcastError {
        BroadcastError::interrupted("wait worker dropped the subscription")
    }

    fn expire(&mut self) -> BroadcastResult<Outcome<C>> {
        // The worker may have answered right at the deadline.
        if let Ok(result) = self.rx.try_recv() {
            return result;
        }
        let Some(settle) = self.settle.take() else {
            return Ok(Outcome::TimedOut);
        };
        debug!(subscription = %self.id, "deadline passed before a wait worker answered, settling on caller");
        panic::catch_unwind(AssertUnwindSafe(settle)).unwrap_or_else(|_| Err(Self::interrupted()))
    }

    /// Takes the outcome if it is available. Returns `None` while pending and
    /// after the outcome was taken.
    pub fn try_outcome(&mut self) -> Option<BroadcastResult<Outcome<C>>> {
        if self.taken {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => self.expired().then(|| self.expire()),
            Err(TryRecvError::Disconnected) => Some(Err(Self::interrupted())),
        };
        self.taken = result.is_some();
        result
    }

    /// Blocks until the outcome is available or the deadline passes, then
    /// settles the subscription against the holder's state at that moment.
    ///
    /// # Errors
    ///
    /// - Whatever the slow path reported.
    /// - `WaitInterrupted` if the worker dropped the subscription.
    /// - `Internal` if the outcome was already taken.
    pub fn wait(mut self) -> BroadcastResult<Outcome<C>> {
        if self.taken {
            return Err(BroadcastError::internal("subscription outcome already taken"));
        }
        self.taken = true;
        match self.deadline {
            None => self.rx.recv().map_err(|_| Self::interrupted())?,
            Some(deadline) => match self.rx.recv_deadline(deadline) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => self.expire(),
                Err(RecvTimeoutError::Disconnected) => Err(Self::interrupted()),
            },
        }
    }
}

impl<C> fmt::Debug for PendingOutcome<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOutcome")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .field("taken", &self.taken)
            .finish_non_exhaustive()
    }
}
