//! Event delivery: sessions, queues and routing.
//!
//! A [`DeliverySession`] fans one event out to a fixed snapshot of handlers.
//! Asynchronous publishes are turned into jobs on a [`DeliveryQueue`], a
//! single-consumer worker task selected by a [`QueueKey`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

pub mod channel;
pub mod session;
pub mod worker;

pub use channel::DeliveryQueue;
pub use session::{DeliveryReport, DeliverySession};
pub(crate) use session::DeliveryContext;
pub(crate) use worker::QueuePool;

tokio::task_local! {
    static CURRENT_QUEUE: QueueKey;
}

/// Returns the key of the delivery queue whose worker is running the
/// current task, or `None` outside of queue workers.
///
/// Handlers invoked from an asynchronous publish observe the queue they were
/// dispatched on, including when they run under timeout supervision.
pub fn current_queue() -> Option<QueueKey> {
    CURRENT_QUEUE.try_with(Clone::clone).ok()
}

/// Runs `future` as part of the queue identified by `key`.
pub(crate) fn in_queue<F: Future>(key: QueueKey, future: F) -> impl Future<Output = F::Output> {
    CURRENT_QUEUE.scope(key, future)
}

/// Identity used to select the delivery queue for an asynchronous publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueKey {
    /// The single queue of the shared strategy
    Shared,
    /// A Tokio task acting as publisher
    Task(tokio::task::Id),
    /// An OS thread acting as publisher (outside of any Tokio task)
    Thread(ThreadId),
    /// A publisher identity chosen by the caller
    Named(String),
    /// A slot of a hashed worker pool
    Slot(usize),
}

impl QueueKey {
    /// Identity of the current publisher: the running Tokio task, or the
    /// current thread when called outside of a task.
    pub fn publisher() -> Self {
        tokio::task::try_id()
            .map(Self::Task)
            .unwrap_or_else(|| Self::Thread(std::thread::current().id()))
    }

    /// A caller-chosen publisher identity
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Hash this key onto one of `workers` slots
    pub fn slot(&self, workers: usize) -> Self {
        let hash = fxhash::hash64(self);
        Self::Slot((hash as usize) % workers.max(1))
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Task(id) => write!(f, "task-{id}"),
            Self::Thread(id) => write!(f, "{id:?}"),
            Self::Named(name) => write!(f, "named-{name}"),
            Self::Slot(slot) => write!(f, "slot-{slot}"),
        }
    }
}

/// How asynchronous publishers are mapped onto delivery queues.
///
/// Whatever the strategy, a publish issued from inside a queue worker is
/// enqueued on that same worker. The default hashes publishers onto one
/// queue per CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerKeyStrategy {
    /// One queue per publisher identity; FIFO per publisher.
    /// Queues live until shutdown, so a publisher population that keeps
    /// spawning new tasks keeps growing the pool.
    PerPublisher,
    /// A single queue for everything; global FIFO
    Shared,
    /// Publisher identities hashed onto a fixed number of queues
    Hashed {
        /// Number of queues
        workers: usize,
    },
}

impl Default for WorkerKeyStrategy {
    fn default() -> Self {
        Self::hashed()
    }
}

impl WorkerKeyStrategy {
    /// A hashed pool with one queue per CPU
    pub fn hashed() -> Self {
        Self::Hashed {
            workers: num_cpus::get().max(1),
        }
    }

    /// The queue that `publisher` should be routed to
    pub fn route(&self, publisher: QueueKey) -> QueueKey {
        match self {
            Self::PerPublisher => publisher,
            Self::Shared => QueueKey::Shared,
            Self::Hashed { workers } => publisher.slot(*workers),
        }
    }
}

/// Delivery counters shared by the façade, queues and sessions
#[derive(Debug, Default)]
pub(crate) struct DeliveryMetrics {
    pub(crate) events_published: AtomicU64,
    pub(crate) events_unmatched: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
    pub(crate) queues_created: AtomicU64,
    pub(crate) sessions_started: AtomicU64,
    pub(crate) deliveries: AtomicU64,
    pub(crate) handler_failures: AtomicU64,
    pub(crate) handler_timeouts: AtomicU64,
}

impl DeliveryMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_queues: usize) -> DeliveryStats {
        DeliveryStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_unmatched: self.events_unmatched.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            queues_created: self.queues_created.load(Ordering::Relaxed),
            active_queues,
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for event delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Events accepted by `publish_*`
    pub events_published: u64,

    /// Published events that no handler matched
    pub events_unmatched: u64,

    /// Events dropped because their queue was full
    pub events_dropped: u64,

    /// Delivery queues created since start
    pub queues_created: u64,

    /// Delivery queues currently running
    pub active_queues: usize,

    /// Delivery sessions started (sync and async)
    pub sessions_started: u64,

    /// Successful handler invocations
    pub deliveries: u64,

    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,

    /// Handler invocations abandoned after the per-handler timeout
    pub handler_timeouts: u64,
}
