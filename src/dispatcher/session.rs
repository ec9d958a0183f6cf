//! One-shot delivery of a single event to a snapshot of handlers.

use super::{current_queue, in_queue, DeliveryMetrics};
use crate::registry::HandlerRegistry;
use crate::subscription::TrackedHandler;
use crate::{Error, Event, Result};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::ops::AddAssign;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, trace, warn};

/// Everything a session needs besides the event itself.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryContext {
    pub(crate) registry: Arc<HandlerRegistry>,
    /// Per-handler time limit; `None` disables supervision
    pub(crate) timeout: Option<Duration>,
    pub(crate) require_in_time: bool,
    pub(crate) metrics: Arc<DeliveryMetrics>,
}

/// Outcome counts of one delivery session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handlers whose callback completed successfully
    pub delivered: usize,
    /// Handlers skipped because they were inactive, filtered out or too young
    pub filtered: usize,
    /// Handlers whose callback returned an error or panicked
    pub failed: usize,
    /// Handlers abandoned and blacklisted after the time limit
    pub timed_out: usize,
}

impl DeliveryReport {
    /// Number of handlers the session went through
    pub fn attempted(&self) -> usize {
        self.delivered + self.filtered + self.failed + self.timed_out
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Delivered => self.delivered += 1,
            Outcome::Filtered => self.filtered += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::TimedOut => self.timed_out += 1,
        }
    }
}

impl AddAssign for DeliveryReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.filtered += other.filtered;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delivered: {}, Filtered: {}, Failed: {}, Timed out: {}",
            self.delivered, self.filtered, self.failed, self.timed_out
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Filtered,
    Failed,
    TimedOut,
}

/// Delivers one event to a fixed list of handlers, in list order.
///
/// The handler list is captured when the event is published; handlers that
/// become inactive before their turn are skipped. Every handler is attempted
/// even if earlier ones fail or time out.
pub struct DeliverySession {
    context: DeliveryContext,
    event: Arc<Event>,
    handlers: Vec<Arc<TrackedHandler>>,
}

impl DeliverySession {
    pub(crate) fn new(
        context: DeliveryContext,
        event: Arc<Event>,
        handlers: Vec<Arc<TrackedHandler>>,
    ) -> Self {
        DeliveryMetrics::incr(&context.metrics.sessions_started);
        Self {
            context,
            event,
            handlers,
        }
    }

    /// The event being delivered
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Number of handlers in the snapshot
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the session to completion.
    pub async fn run(self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for handler in &self.handlers {
            let outcome = self.deliver_to(handler).await;
            report.record(outcome);
        }

        trace!(
            event_id = %self.event.event_id(),
            topic = self.event.topic(),
            %report,
            "Delivery session finished"
        );
        report
    }

    async fn deliver_to(&self, handler: &Arc<TrackedHandler>) -> Outcome {
        if self.context.require_in_time && !handler.is_in_time(&self.event) {
            trace!(handler_id = %handler.id(), "Event predates subscription; skipped");
            return Outcome::Filtered;
        }

        match self.context.timeout {
            Some(limit) => self.invoke_supervised(handler, limit).await,
            None => {
                let result = AssertUnwindSafe(handler.handle_subject_to_filter(&self.event))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(panicked(panic)));
                self.settle(handler, result)
            }
        }
    }

    /// Runs the callback on its own task and abandons it after `limit`.
    async fn invoke_supervised(&self, handler: &Arc<TrackedHandler>, limit: Duration) -> Outcome {
        let task_handler = handler.clone();
        let event = self.event.clone();
        let invocation = async move {
            AssertUnwindSafe(task_handler.handle_subject_to_filter(&event))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panicked(panic)))
        };

        // The callback must still see the queue it was dispatched on
        let join = match current_queue() {
            Some(key) => tokio::spawn(in_queue(key, invocation)),
            None => tokio::spawn(invocation),
        };

        match tokio::time::timeout(limit, join).await {
            Ok(Ok(result)) => self.settle(handler, result),
            Ok(Err(join_error)) => self.settle(
                handler,
                Err(Error::internal(format!("handler task failed: {join_error}"))),
            ),
            Err(_) => {
                // Dropping the join handle detaches the invocation
                let blacklisted = self.context.registry.blacklist(handler.id());
                handler.record_failure();
                DeliveryMetrics::incr(&self.context.metrics.handler_timeouts);
                error!(
                    handler_id = %handler.id(),
                    handler_name = handler.name(),
                    topic = self.event.topic(),
                    timeout_ms = limit.as_millis() as u64,
                    blacklisted,
                    "Handler exceeded delivery timeout and was blacklisted"
                );
                Outcome::TimedOut
            }
        }
    }

    fn settle(&self, handler: &TrackedHandler, result: Result<bool>) -> Outcome {
        match result {
            Ok(true) => {
                handler.record_delivery();
                DeliveryMetrics::incr(&self.context.metrics.deliveries);
                Outcome::Delivered
            }
            Ok(false) => Outcome::Filtered,
            Err(e) => {
                handler.record_failure();
                DeliveryMetrics::incr(&self.context.metrics.handler_failures);
                warn!(
                    handler_id = %handler.id(),
                    handler_name = handler.name(),
                    event_id = %self.event.event_id(),
                    topic = self.event.topic(),
                    error = %e,
                    "Handler failed; continuing delivery"
                );
                Outcome::Failed
            }
        }
    }
}

impl fmt::Debug for DeliverySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySession")
            .field("event_id", &self.event.event_id())
            .field("topic", &self.event.topic())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    Error::HandlerPanicked(message)
}
