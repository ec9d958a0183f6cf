//! Per-subscription state.
//!
//! A [`TrackedHandler`] wraps the user's [`EventHandler`] together with its
//! topic patterns, optional filter and fault state. Tracked handlers are
//! owned by the [`HandlerRegistry`](crate::registry::HandlerRegistry), which
//! is the only code allowed to change their subscription or state.

use crate::filter::Filter;
use crate::registry::TopicPattern;
use crate::{Event, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod handle;
pub mod handler;

pub use handle::{HandlerId, SubscriptionHandle};
pub use handler::{EventHandler, FunctionHandler, HandlerStats};

/// Fault state of a tracked handler.
///
/// ```text
/// Active ──(timeout | malformed subscription)──► Blacklisted
///   ▲                                               │
///   └──────────────(successful update)──────────────┘
/// Active | Blacklisted ──(unsubscribe)──► Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HandlerState {
    /// Indexed and receiving events
    Active,
    /// Removed from every index until reconfigured
    Blacklisted,
    /// Unsubscribed; never reactivated
    Destroyed,
}

/// The mutable part of a tracked handler, guarded by its lock.
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    /// Topic patterns as given by the subscriber
    pub(crate) topics: Vec<String>,
    /// Parsed patterns; empty unless the handler is Active
    pub(crate) patterns: Vec<TopicPattern>,
    /// Filter expression as given by the subscriber
    pub(crate) filter_expr: Option<String>,
    pub(crate) filter: Option<Arc<Filter>>,
    pub(crate) state: HandlerState,
}

/// A registered handler and its subscription.
pub struct TrackedHandler {
    id: HandlerId,
    name: String,
    handler: Arc<dyn EventHandler>,
    registered_at: DateTime<Utc>,
    subscription: RwLock<Subscription>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl TrackedHandler {
    pub(crate) fn new(
        id: HandlerId,
        name: String,
        handler: Arc<dyn EventHandler>,
        topics: Vec<String>,
        filter_expr: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            handler,
            registered_at: Utc::now(),
            subscription: RwLock::new(Subscription {
                topics,
                patterns: Vec::new(),
                filter_expr,
                filter: None,
                // Becomes Active only once the registry has indexed it
                state: HandlerState::Blacklisted,
            }),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Handler ID
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Handler name for debugging
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the handler was subscribed
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Current fault state
    pub fn state(&self) -> HandlerState {
        self.read().state
    }

    /// Topic patterns as given by the subscriber
    pub fn topics(&self) -> Vec<String> {
        self.read().topics.clone()
    }

    /// Filter expression as given by the subscriber
    pub fn filter_expr(&self) -> Option<String> {
        self.read().filter_expr.clone()
    }

    /// Delivery statistics
    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` if the event was created no earlier than this
    /// handler's subscription.
    pub fn is_in_time(&self, event: &Event) -> bool {
        !event.metadata().created_before(self.registered_at)
    }

    /// Deliver `event` if the handler is Active and its filter accepts it.
    ///
    /// Returns `Ok(false)` without invoking the callback when the handler is
    /// not Active or the filter rejects the event. Errors from the callback
    /// propagate unchanged and leave the state untouched.
    pub async fn handle_subject_to_filter(&self, event: &Event) -> Result<bool> {
        if !self.admits(event) {
            return Ok(false);
        }
        self.handler.handle(event).await?;
        Ok(true)
    }

    fn admits(&self, event: &Event) -> bool {
        let subscription = self.read();
        if subscription.state != HandlerState::Active {
            return false;
        }
        match &subscription.filter {
            Some(filter) => filter.matches(event.properties()),
            None => true,
        }
    }

    pub(crate) fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self) -> RwLockReadGuard<'_, Subscription> {
        self.subscription
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access for the registry. Held across bucket updates so that
    /// concurrent register/blacklist/unregister calls on one handler serialize.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Subscription> {
        self.subscription
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TrackedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscription = self.read();
        f.debug_struct("TrackedHandler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("topics", &subscription.topics)
            .field("filter", &subscription.filter_expr)
            .field("state", &subscription.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use crate::Error;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        Arc::new(FunctionHandler::new(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    }

    fn activate(tracked: &TrackedHandler, filter: Option<&str>) {
        let mut subscription = tracked.write();
        subscription.filter = filter.map(|f| Arc::new(Filter::parse(f).unwrap()));
        subscription.state = HandlerState::Active;
    }

    #[tokio::test]
    async fn test_inactive_handler_is_not_invoked() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tracked = TrackedHandler::new(
            Uuid::new_v4(),
            "h".into(),
            counting_handler(counter.clone()),
            vec!["a".into()],
            None,
        );
        let event = Event::builder("a").build().unwrap();

        assert_eq!(tracked.state(), HandlerState::Blacklisted);
        assert!(!tracked.handle_subject_to_filter(&event).await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        activate(&tracked, None);
        assert!(tracked.handle_subject_to_filter(&event).await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filter_gates_delivery() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tracked = TrackedHandler::new(
            Uuid::new_v4(),
            "h".into(),
            counting_handler(counter.clone()),
            vec!["log".into()],
            Some("(level=error)".into()),
        );
        activate(&tracked, Some("(level=error)"));

        let info = Event::builder("log").property("level", "info").build().unwrap();
        let error = Event::builder("log").property("level", "error").build().unwrap();

        assert!(!tracked.handle_subject_to_filter(&info).await.unwrap());
        assert!(tracked.handle_subject_to_filter(&error).await.unwrap());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_error_keeps_state() {
        let failing: Arc<dyn EventHandler> =
            Arc::new(FunctionHandler::new(|_| async { Err(Error::handler("boom")) }));
        let tracked = TrackedHandler::new(Uuid::new_v4(), "f".into(), failing, vec![], None);
        activate(&tracked, None);

        let event = Event::builder("a").build().unwrap();
        assert!(tracked.handle_subject_to_filter(&event).await.is_err());
        assert_eq!(tracked.state(), HandlerState::Active);
    }

    #[test]
    fn test_in_time() {
        let tracked = TrackedHandler::new(
            Uuid::new_v4(),
            "h".into(),
            counting_handler(Arc::new(AtomicUsize::new(0))),
            vec![],
            None,
        );
        let metadata = EventMetadata::at(tracked.registered_at() - chrono::Duration::seconds(1));
        let early = Event::with_metadata("a", Default::default(), metadata).unwrap();
        let late = Event::builder("a").build().unwrap();

        assert!(!tracked.is_in_time(&early));
        assert!(tracked.is_in_time(&late));
    }
}
