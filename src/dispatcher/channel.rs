//! Channel-backed delivery queue.

use super::{in_queue, DeliveryContext, DeliveryMetrics, DeliverySession, QueueKey};
use crate::subscription::TrackedHandler;
use crate::{Error, Event, Result};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

/// An event waiting for delivery together with its handler snapshot.
pub(crate) struct DeliveryJob {
    pub(crate) event: Arc<Event>,
    pub(crate) handlers: Vec<Arc<TrackedHandler>>,
}

/// Queue settings shared by every queue of a pool
#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueSettings {
    pub(crate) capacity: usize,
    pub(crate) drop_on_full: bool,
}

/// A FIFO of delivery jobs drained by a single worker task.
///
/// Jobs run one at a time in enqueue order, so events published through the
/// same queue reach every handler in publish order. The worker runs inside
/// the queue's scope: [`current_queue`](super::current_queue) returns this
/// queue's key from any handler it invokes.
pub struct DeliveryQueue {
    key: QueueKey,
    sender: mpsc::Sender<DeliveryJob>,
    settings: QueueSettings,
    metrics: Arc<DeliveryMetrics>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryQueue {
    /// Create the queue and spawn its worker on `runtime`
    pub(crate) fn spawn(
        key: QueueKey,
        settings: QueueSettings,
        context: DeliveryContext,
        shutdown: watch::Receiver<bool>,
        runtime: &Handle,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let metrics = context.metrics.clone();

        let worker = Self::process_jobs(key.clone(), receiver, shutdown, context);
        let handle = runtime.spawn(in_queue(key.clone(), worker));

        Self {
            key,
            sender,
            settings,
            metrics,
            worker_handle: Mutex::new(Some(handle)),
        }
    }

    /// Key this queue was created for
    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    /// Jobs waiting for the worker
    pub fn pending(&self) -> usize {
        self.sender
            .max_capacity()
            .saturating_sub(self.sender.capacity())
    }

    /// Append a job without waiting.
    ///
    /// A full queue either drops the job or fails with
    /// [`Error::QueueFull`], depending on the pool settings.
    pub(crate) fn enqueue(&self, job: DeliveryJob) -> Result<()> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                if self.settings.drop_on_full {
                    DeliveryMetrics::incr(&self.metrics.events_dropped);
                    warn!(
                        queue = %self.key,
                        event_id = %job.event.event_id(),
                        topic = job.event.topic(),
                        "Delivery queue full, dropping event"
                    );
                    Ok(())
                } else {
                    Err(Error::QueueFull {
                        key: self.key.to_string(),
                    })
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::QueueClosed {
                key: self.key.to_string(),
            }),
        }
    }

    /// Detach the worker handle so the caller can await it
    pub(crate) fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn process_jobs(
        key: QueueKey,
        mut receiver: mpsc::Receiver<DeliveryJob>,
        mut shutdown: watch::Receiver<bool>,
        context: DeliveryContext,
    ) {
        info!(queue = %key, "Delivery queue worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let job = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            trace!(
                queue = %key,
                event_id = %job.event.event_id(),
                topic = job.event.topic(),
                handlers = job.handlers.len(),
                "Processing event from queue"
            );

            DeliverySession::new(context.clone(), job.event, job.handlers)
                .run()
                .await;
        }

        let abandoned = receiver.len();
        if abandoned > 0 {
            warn!(queue = %key, abandoned, "Delivery queue stopped with pending events");
        }
        info!(queue = %key, "Delivery queue worker stopped");
    }
}

impl fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("key", &self.key)
            .field("pending", &self.pending())
            .finish()
    }
}
