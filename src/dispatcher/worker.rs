//! Lazily populated pool of delivery queues.

use super::channel::{DeliveryJob, QueueSettings};
use super::{DeliveryContext, DeliveryMetrics, DeliveryQueue, QueueKey};
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Delivery queues keyed by [`QueueKey`], created on first use.
///
/// Queues live until the pool is stopped.
pub(crate) struct QueuePool {
    queues: DashMap<QueueKey, Arc<DeliveryQueue>>,
    settings: QueueSettings,
    context: DeliveryContext,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
}

impl QueuePool {
    pub(crate) fn new(settings: QueueSettings, context: DeliveryContext, runtime: Handle) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queues: DashMap::new(),
            settings,
            context,
            runtime,
            shutdown,
        }
    }

    /// Enqueue `job` on the queue for `key`, creating the queue if needed
    pub(crate) fn enqueue(&self, key: QueueKey, job: DeliveryJob) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(Error::ShuttingDown);
        }

        let queue = self
            .queues
            .entry(key.clone())
            .or_insert_with(|| {
                DeliveryMetrics::incr(&self.context.metrics.queues_created);
                debug!(queue = %key, "Creating delivery queue");
                Arc::new(DeliveryQueue::spawn(
                    key,
                    self.settings,
                    self.context.clone(),
                    self.shutdown.subscribe(),
                    &self.runtime,
                ))
            })
            .clone();

        queue.enqueue(job)
    }

    /// Number of running queues
    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    /// Signal every worker to stop and wait up to `timeout` for them.
    ///
    /// Workers finish the session in progress; queued events are discarded.
    pub(crate) async fn stop(&self, timeout: Duration) -> Result<()> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }

        let queues: Vec<Arc<DeliveryQueue>> =
            self.queues.iter().map(|entry| entry.value().clone()).collect();
        self.queues.clear();
        info!(queues = queues.len(), "Stopping delivery queues");

        let handles: Vec<_> = queues.iter().filter_map(|q| q.take_worker()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results.into_iter().filter_map(|r| r.err()) {
                    warn!(error = %result, "Delivery queue worker ended abnormally");
                }
                info!("Delivery queues stopped");
                Ok(())
            }
            Err(_) => Err(Error::internal("Worker shutdown timeout")),
        }
    }
}

impl std::fmt::Debug for QueuePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePool")
            .field("queues", &self.queues.len())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use crate::subscription::{EventHandler, FunctionHandler};
    use crate::Event;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(registry: Arc<HandlerRegistry>) -> QueuePool {
        let context = DeliveryContext {
            registry,
            timeout: None,
            require_in_time: false,
            metrics: Arc::new(DeliveryMetrics::default()),
        };
        QueuePool::new(
            QueueSettings {
                capacity: 10,
                drop_on_full: false,
            },
            context,
            Handle::current(),
        )
    }

    fn job(registry: &HandlerRegistry) -> DeliveryJob {
        DeliveryJob {
            event: Arc::new(Event::builder("t").build().unwrap()),
            handlers: registry.match_topic("t"),
        }
    }

    #[tokio::test]
    async fn test_queues_created_per_key() {
        let registry = Arc::new(HandlerRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handler: Arc<dyn EventHandler> = Arc::new(FunctionHandler::new(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        registry.register(handler, vec!["t".into()], None);

        let pool = pool(registry.clone());
        for _ in 0..5 {
            pool.enqueue(QueueKey::named("a"), job(&registry)).unwrap();
            pool.enqueue(QueueKey::named("b"), job(&registry)).unwrap();
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.context.metrics.queues_created.load(Ordering::Relaxed), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        pool.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_fails() {
        let registry = Arc::new(HandlerRegistry::new());
        let pool = pool(registry.clone());
        pool.stop(Duration::from_secs(1)).await.unwrap();
        // Stopping twice is harmless
        pool.stop(Duration::from_secs(1)).await.unwrap();

        let err = pool.enqueue(QueueKey::Shared, job(&registry)).unwrap_err();
        assert!(err.is_shutdown());
        assert_eq!(pool.len(), 0);
    }
}
