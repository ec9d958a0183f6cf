//! The main EventAdmin implementation.
//!
//! The EventAdmin is the primary interface for publishing and subscribing to
//! events. It coordinates between the handler registry, the delivery queues
//! and inline delivery sessions.

use crate::dispatcher::channel::DeliveryJob;
use crate::dispatcher::{
    current_queue, DeliveryContext, DeliveryMetrics, DeliveryReport, DeliverySession,
    DeliveryStats, QueueKey, QueuePool,
};
use crate::event::Properties;
use crate::registry::{HandlerRegistry, RegistryStats};
use crate::subscription::{
    EventHandler, FunctionHandler, HandlerId, HandlerState, HandlerStats, SubscriptionHandle,
    TrackedHandler,
};
use crate::{Error, Event, Result};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub mod builder;
pub mod config;

pub use builder::EventAdminBuilder;
pub use config::EventAdminConfig;

/// Topic-based publish/subscribe event admin.
///
/// Cloning is cheap; every clone drives the same registry and queues, so
/// handlers can capture a clone and publish from inside a delivery.
///
/// # Example
///
/// ```rust,no_run
/// use tokio_event_admin::{Event, EventAdmin};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let admin = EventAdmin::builder().build()?;
///
///     // Subscribe to every error-level log event
///     let handle = admin.subscribe_fn(["org/example/log/*"], Some("(level=error)"), |event| async move {
///         println!("{}: {:?}", event.topic(), event.property("message"));
///         Ok(())
///     })?;
///
///     // Publish and wait for delivery
///     let event = Event::builder("org/example/log/LOGGED")
///         .property("level", "error")
///         .property("message", "disk full")
///         .build()?;
///     let report = admin.publish_sync(event).await?;
///     assert_eq!(report.delivered, 1);
///
///     admin.unsubscribe(handle.id())?;
///     admin.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EventAdmin {
    pub(crate) inner: Arc<Inner>,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) config: EventAdminConfig,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) context: DeliveryContext,
    pub(crate) queues: QueuePool,
    pub(crate) metrics: Arc<DeliveryMetrics>,
    pub(crate) is_shutting_down: AtomicBool,
}

impl EventAdmin {
    /// Create a new EventAdmin builder
    pub fn builder() -> EventAdminBuilder {
        EventAdminBuilder::new()
    }

    /// The configuration this admin was built with
    pub fn config(&self) -> &EventAdminConfig {
        &self.inner.config
    }

    /// The underlying handler registry
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Subscribe `handler` to `topics`, optionally gated by an LDAP filter.
    ///
    /// A malformed topic pattern or filter does not fail the call: the
    /// handler is registered Blacklisted and receives nothing until a
    /// successful [`update`](Self::update).
    pub fn subscribe<H, I, S>(
        &self,
        handler: H,
        topics: I,
        filter: Option<&str>,
    ) -> Result<SubscriptionHandle>
    where
        H: EventHandler,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_running()?;

        let name = handler.name().to_string();
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();
        let id = self.inner.registry.register(
            Arc::new(handler),
            topics.clone(),
            filter.map(str::to_string),
        );

        debug!(handler_id = %id, handler_name = %name, ?topics, "Handler subscribed");
        Ok(SubscriptionHandle::new(id, name, topics))
    }

    /// Subscribe a closure
    pub fn subscribe_fn<I, S, F, Fut>(
        &self,
        topics: I,
        filter: Option<&str>,
        handler: F,
    ) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.subscribe(FunctionHandler::new(handler), topics, filter)
    }

    /// Replace a handler's topics and filter.
    ///
    /// Returns the new state; a Blacklisted handler with a well-formed
    /// subscription becomes Active again.
    pub fn update<I, S>(&self, id: HandlerId, topics: I, filter: Option<&str>) -> Result<HandlerState>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_running()?;
        let topics = topics.into_iter().map(Into::into).collect();
        self.inner
            .registry
            .update(id, topics, filter.map(str::to_string))
    }

    /// Unsubscribe a handler
    pub fn unsubscribe(&self, id: HandlerId) -> Result<()> {
        self.inner.registry.unregister(id)
    }

    /// Current state of a handler, `None` once unsubscribed
    pub fn handler_state(&self, id: HandlerId) -> Option<HandlerState> {
        self.inner.registry.state(id)
    }

    /// Delivery counters of a handler
    pub fn handler_stats(&self, id: HandlerId) -> Option<HandlerStats> {
        self.inner.registry.get(id).map(|h| h.stats())
    }

    /// Returns `true` if at least one Active handler is subscribed to `topic`
    pub fn any_match(&self, topic: &str) -> bool {
        self.inner.registry.any_match(topic)
    }

    /// Queue `event` for asynchronous delivery and return immediately.
    ///
    /// Events from one publisher are delivered in publish order. When no
    /// handler matches, nothing is queued.
    pub fn publish_async(&self, event: Event) -> Result<()> {
        self.enqueue(QueueKey::publisher(), event)
    }

    /// Queue `event` as if published by `publisher`
    pub fn publish_async_keyed(&self, publisher: QueueKey, event: Event) -> Result<()> {
        self.enqueue(publisher, event)
    }

    /// Deliver `event` on the calling task and wait until every matching
    /// handler has been attempted.
    pub async fn publish_sync(&self, event: Event) -> Result<DeliveryReport> {
        let Some(handlers) = self.matching(&event)? else {
            return Ok(DeliveryReport::default());
        };

        let session = DeliverySession::new(self.inner.context.clone(), Arc::new(event), handlers);
        Ok(session.run().await)
    }

    /// Build and queue an event, skipping construction when nobody listens
    pub fn post(&self, topic: &str, properties: Properties) -> Result<()> {
        if self.skip_unmatched(topic)? {
            return Ok(());
        }
        self.publish_async(Event::new(topic, properties)?)
    }

    /// Build and deliver an event synchronously, skipping construction when
    /// nobody listens
    pub async fn send(&self, topic: &str, properties: Properties) -> Result<DeliveryReport> {
        if self.skip_unmatched(topic)? {
            return Ok(DeliveryReport::default());
        }
        self.publish_sync(Event::new(topic, properties)?).await
    }

    /// Get statistics about the event admin
    pub fn stats(&self) -> EventAdminStats {
        EventAdminStats {
            registry: self.inner.registry.stats(),
            delivery: self.inner.metrics.snapshot(self.inner.queues.len()),
        }
    }

    /// Check if the event admin is shutting down
    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down.load(Ordering::Acquire)
    }

    /// Shut down gracefully.
    ///
    /// Further publishes and subscriptions fail with
    /// [`Error::ShuttingDown`]. Workers finish the session in progress and
    /// discard queued events; then every handler is unregistered.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.is_shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down EventAdmin");

        if let Err(e) = self.inner.queues.stop(self.inner.config.shutdown_wait()).await {
            warn!(error = %e, "Delivery queues did not stop in time");
        }
        self.inner.registry.clear();

        info!("EventAdmin shutdown complete");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Snapshot the handlers for `event`, or `None` if nothing matches
    fn matching(&self, event: &Event) -> Result<Option<Vec<Arc<TrackedHandler>>>> {
        self.ensure_running()?;
        DeliveryMetrics::incr(&self.inner.metrics.events_published);

        let handlers = self.inner.registry.match_topic(event.topic());
        if handlers.is_empty() {
            DeliveryMetrics::incr(&self.inner.metrics.events_unmatched);
            trace!(event_id = %event.event_id(), topic = event.topic(), "No handlers for event");
            return Ok(None);
        }
        Ok(Some(handlers))
    }

    fn skip_unmatched(&self, topic: &str) -> Result<bool> {
        self.ensure_running()?;
        if self.any_match(topic) {
            return Ok(false);
        }
        DeliveryMetrics::incr(&self.inner.metrics.events_published);
        DeliveryMetrics::incr(&self.inner.metrics.events_unmatched);
        trace!(topic, "No handlers for topic");
        Ok(true)
    }

    fn enqueue(&self, publisher: QueueKey, event: Event) -> Result<()> {
        let Some(handlers) = self.matching(&event)? else {
            return Ok(());
        };

        // Publishes from inside a worker stay on that worker
        let key = current_queue()
            .unwrap_or_else(|| self.inner.config.worker_key_strategy.route(publisher));

        trace!(
            event_id = %event.event_id(),
            topic = event.topic(),
            queue = %key,
            handlers = handlers.len(),
            "Queueing event"
        );

        let job = DeliveryJob {
            event: Arc::new(event),
            handlers,
        };
        self.inner.queues.enqueue(key, job)
    }
}

/// Statistics about the event admin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAdminStats {
    /// Handler registry statistics
    pub registry: RegistryStats,

    /// Delivery statistics
    pub delivery: DeliveryStats,
}

impl fmt::Display for EventAdminStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventAdmin Stats: {} handlers ({} active), {} events published, {} deliveries, {} queues",
            self.registry.handlers,
            self.registry.active,
            self.delivery.events_published,
            self.delivery.deliveries,
            self.delivery.active_queues
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::WorkerKeyStrategy;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    fn admin() -> EventAdmin {
        EventAdmin::builder()
            .config(EventAdminConfig::test())
            .build()
            .unwrap()
    }

    fn event(topic: &str) -> Event {
        Event::builder(topic).build().unwrap()
    }

    #[tokio::test]
    async fn test_event_admin_basic() {
        let admin = admin();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let handle = admin
            .subscribe_fn(["greeting/*"], None, move |event| {
                let received = received_clone.clone();
                async move {
                    received.lock().unwrap().push(event.topic().to_string());
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(handle.name(), "FunctionHandler");
        assert_eq!(handle.topics(), ["greeting/*"]);

        admin.publish_async(event("greeting/first")).unwrap();
        admin.publish_async(event("greeting/second")).unwrap();
        admin.publish_async(event("farewell")).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            *received.lock().unwrap(),
            vec!["greeting/first".to_string(), "greeting/second".to_string()]
        );
        let stats = admin.stats();
        assert_eq!(stats.delivery.events_published, 3);
        assert_eq!(stats.delivery.events_unmatched, 1);
        assert_eq!(stats.delivery.queues_created, 1);
        assert_eq!(admin.handler_stats(handle.id()).unwrap().delivered, 2);

        admin.unsubscribe(handle.id()).unwrap();
        assert_eq!(admin.handler_state(handle.id()), None);
        assert!(matches!(
            admin.unsubscribe(handle.id()),
            Err(Error::HandlerNotFound { .. })
        ));

        admin.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_sync_reports() {
        let admin = admin();
        admin.subscribe_fn(["a"], None, |_| async { Ok(()) }).unwrap();
        admin
            .subscribe_fn(["a"], None, |_| async { Err(Error::handler("nope")) })
            .unwrap();
        admin
            .subscribe_fn(["a"], Some("(x=1)"), |_| async { Ok(()) })
            .unwrap();

        let report = admin.publish_sync(event("a")).await.unwrap();
        assert_eq!(
            report,
            DeliveryReport {
                delivered: 1,
                filtered: 1,
                failed: 1,
                timed_out: 0
            }
        );
        // Sync publishing never creates a queue
        assert_eq!(admin.stats().delivery.queues_created, 0);
    }

    #[tokio::test]
    async fn test_malformed_subscription_and_update() {
        let admin = admin();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handle = admin
            .subscribe_fn(["a/*/b"], None, move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(admin.handler_state(handle.id()), Some(HandlerState::Blacklisted));
        assert!(!admin.any_match("a/x/b"));

        let state = admin.update(handle.id(), ["a/*"], Some("(level=*)")).unwrap();
        assert_eq!(state, HandlerState::Active);

        let report = admin
            .send("a/x", [("level".to_string(), "info".into())].into())
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let state = admin.update(handle.id(), ["a"], Some("(level=")).unwrap();
        assert_eq!(state, HandlerState::Blacklisted);
    }

    #[tokio::test]
    async fn test_post_without_listeners_is_free() {
        let admin = admin();
        admin.post("nobody/listens", Properties::new()).unwrap();
        let report = admin.send("nobody/listens", Properties::new()).await.unwrap();
        assert_eq!(report.attempted(), 0);

        let stats = admin.stats();
        assert_eq!(stats.delivery.events_unmatched, 2);
        assert_eq!(stats.delivery.queues_created, 0);
        assert_eq!(stats.delivery.sessions_started, 0);
    }

    #[tokio::test]
    async fn test_keyed_publish_routes_to_named_queue() {
        let admin = EventAdmin::builder()
            .config(EventAdminConfig::test().worker_key_strategy(WorkerKeyStrategy::PerPublisher))
            .build()
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        admin
            .subscribe_fn(["k"], None, move |_| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(current_queue());
                    Ok(())
                }
            })
            .unwrap();

        admin
            .publish_async_keyed(QueueKey::named("bundle-7"), event("k"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*seen.lock().unwrap(), vec![Some(QueueKey::named("bundle-7"))]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_further_work() {
        let admin = admin();
        let handle = admin.subscribe_fn(["a"], None, |_| async { Ok(()) }).unwrap();
        admin.publish_async(event("a")).unwrap();

        admin.shutdown().await.unwrap();
        assert!(admin.is_shutting_down());
        // Shutdown is idempotent
        admin.shutdown().await.unwrap();

        assert!(admin.publish_async(event("a")).unwrap_err().is_shutdown());
        assert!(admin.publish_sync(event("a")).await.unwrap_err().is_shutdown());
        assert!(admin
            .subscribe_fn(["a"], None, |_| async { Ok(()) })
            .unwrap_err()
            .is_shutdown());
        assert_eq!(admin.handler_state(handle.id()), None);
        assert_eq!(admin.stats().registry.handlers, 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = EventAdminStats {
            registry: RegistryStats {
                handlers: 2,
                active: 1,
                ..Default::default()
            },
            delivery: DeliveryStats {
                events_published: 5,
                deliveries: 4,
                active_queues: 1,
                ..Default::default()
            },
        };
        assert_eq!(
            stats.to_string(),
            "EventAdmin Stats: 2 handlers (1 active), 5 events published, 4 deliveries, 1 queues"
        );
    }
}
