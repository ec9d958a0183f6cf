//! DashMap-based handler registry for concurrent access.

use super::{RegistryStats, TopicPattern};
use crate::filter::Filter;
use crate::subscription::{
    EventHandler, HandlerId, HandlerState, Subscription, TrackedHandler,
};
use crate::{Error, Result};
use ::dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};
use uuid::Uuid;

type Bucket = Vec<Arc<TrackedHandler>>;

/// A thread-safe handler registry using DashMap.
///
/// Buckets are sharded so that matching a topic only contends with writers
/// touching the same shard. No DashMap guard is ever held while a handler's
/// own lock is being acquired.
#[derive(Default)]
pub struct HandlerRegistry {
    /// All handlers that have not been unregistered
    handlers: DashMap<HandlerId, Arc<TrackedHandler>>,

    /// Exact topic to handlers
    exact: DashMap<String, Bucket>,

    /// Wildcard prefix to handlers
    wildcard: DashMap<String, Bucket>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handlers: DashMap::with_capacity(capacity),
            exact: DashMap::with_capacity(capacity),
            wildcard: DashMap::with_capacity(capacity),
        }
    }

    /// Register a handler for `topics`, optionally gated by `filter`.
    ///
    /// Never fails: a malformed topic pattern or filter leaves the handler
    /// Blacklisted and unindexed until a successful [`update`](Self::update).
    pub fn register(
        &self,
        handler: Arc<dyn EventHandler>,
        topics: Vec<String>,
        filter: Option<String>,
    ) -> HandlerId {
        let id = Uuid::new_v4();
        let name = handler.name().to_string();
        let tracked = Arc::new(TrackedHandler::new(id, name, handler, topics, filter));

        trace!(handler_id = %id, handler_name = %tracked.name(), "Registering handler");

        self.handlers.insert(id, tracked.clone());

        let mut subscription = tracked.write();
        // A concurrent clear() may already have destroyed it.
        if subscription.state != HandlerState::Destroyed {
            self.index(&tracked, &mut subscription);
        }

        id
    }

    /// Replace the topics and filter of a handler.
    ///
    /// Returns the resulting state: Active, or Blacklisted if the new
    /// subscription is malformed.
    pub fn update(
        &self,
        id: HandlerId,
        topics: Vec<String>,
        filter: Option<String>,
    ) -> Result<HandlerState> {
        let tracked = self.get(id).ok_or(Error::HandlerNotFound { id })?;
        let mut subscription = tracked.write();
        if subscription.state == HandlerState::Destroyed {
            return Err(Error::HandlerNotFound { id });
        }

        self.remove_all_references(id, &mut subscription);
        subscription.topics = topics;
        subscription.filter_expr = filter;
        self.index(&tracked, &mut subscription);

        debug!(handler_id = %id, state = ?subscription.state, "Handler subscription updated");
        Ok(subscription.state)
    }

    /// Unregister a handler. Its state becomes Destroyed.
    pub fn unregister(&self, id: HandlerId) -> Result<()> {
        trace!(handler_id = %id, "Unregistering handler");

        let (_, tracked) = self
            .handlers
            .remove(&id)
            .ok_or(Error::HandlerNotFound { id })?;

        let mut subscription = tracked.write();
        self.remove_all_references(id, &mut subscription);
        subscription.state = HandlerState::Destroyed;

        debug!(handler_id = %id, "Handler unregistered");
        Ok(())
    }

    /// Remove an Active handler from every index and mark it Blacklisted.
    ///
    /// Idempotent: returns `true` only for the call that performed the
    /// transition. Unknown handlers are ignored.
    pub fn blacklist(&self, id: HandlerId) -> bool {
        let Some(tracked) = self.get(id) else {
            return false;
        };

        let mut subscription = tracked.write();
        if subscription.state != HandlerState::Active {
            return false;
        }
        self.remove_all_references(id, &mut subscription);
        subscription.state = HandlerState::Blacklisted;

        debug!(handler_id = %id, handler_name = %tracked.name(), "Handler blacklisted");
        true
    }

    /// All handlers whose patterns select `topic`.
    ///
    /// Exact subscribers come first, then wildcard subscribers by increasing
    /// prefix length. A handler matched by several patterns appears once.
    pub fn match_topic(&self, topic: &str) -> Vec<Arc<TrackedHandler>> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        let mut collect = |bucket: &Bucket| {
            for handler in bucket {
                if seen.insert(handler.id()) {
                    matched.push(handler.clone());
                }
            }
        };

        if let Some(bucket) = self.exact.get(topic) {
            collect(bucket.value());
        }
        for end in prefix_ends(topic) {
            if let Some(bucket) = self.wildcard.get(&topic[..end]) {
                collect(bucket.value());
            }
        }

        trace!(topic, matched = matched.len(), "Matched topic");
        matched
    }

    /// Fast check whether any handler is interested in `topic`.
    pub fn any_match(&self, topic: &str) -> bool {
        self.exact.contains_key(topic)
            || prefix_ends(topic).any(|end| self.wildcard.contains_key(&topic[..end]))
    }

    /// Get a handler by ID
    pub fn get(&self, id: HandlerId) -> Option<Arc<TrackedHandler>> {
        self.handlers.get(&id).map(|entry| entry.value().clone())
    }

    /// Current state of a handler; `None` once unregistered
    pub fn state(&self, id: HandlerId) -> Option<HandlerState> {
        self.get(id).map(|tracked| tracked.state())
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Get current registry statistics
    pub fn stats(&self) -> RegistryStats {
        let handlers: Vec<_> = self
            .handlers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut stats = RegistryStats {
            handlers: handlers.len(),
            exact_buckets: self.exact.len(),
            wildcard_buckets: self.wildcard.len(),
            ..RegistryStats::default()
        };
        for handler in handlers {
            match handler.state() {
                HandlerState::Active => stats.active += 1,
                HandlerState::Blacklisted => stats.blacklisted += 1,
                HandlerState::Destroyed => {}
            }
        }
        stats
    }

    /// Unregister every handler
    pub fn clear(&self) {
        let ids: Vec<HandlerId> = self.handlers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            // Lost a race with a concurrent unregister; nothing left to do.
            let _ = self.unregister(id);
        }
    }

    /// Validate the subscription and insert the handler into its buckets,
    /// or blacklist it on a configuration fault.
    fn index(&self, tracked: &Arc<TrackedHandler>, subscription: &mut Subscription) {
        match validate(&subscription.topics, subscription.filter_expr.as_deref()) {
            Ok((patterns, filter)) => {
                for pattern in &patterns {
                    let (index, key) = self.index_for(pattern);
                    index
                        .entry(key.to_string())
                        .or_default()
                        .push(tracked.clone());
                }
                subscription.patterns = patterns;
                subscription.filter = filter.map(Arc::new);
                subscription.state = HandlerState::Active;

                debug!(
                    handler_id = %tracked.id(),
                    topics = ?subscription.topics,
                    filter = ?subscription.filter_expr,
                    "Handler indexed"
                );
            }
            Err(e) => {
                subscription.patterns.clear();
                subscription.filter = None;
                subscription.state = HandlerState::Blacklisted;

                error!(
                    handler_id = %tracked.id(),
                    handler_name = %tracked.name(),
                    error = %e,
                    "Invalid subscription, handler blacklisted"
                );
            }
        }
    }

    /// Evict the handler from every bucket it was inserted into. Safe to call
    /// more than once.
    fn remove_all_references(&self, id: HandlerId, subscription: &mut Subscription) {
        for pattern in subscription.patterns.drain(..) {
            let (index, key) = self.index_for(&pattern);
            if let Some(mut bucket) = index.get_mut(key) {
                bucket.retain(|handler| handler.id() != id);
            }
            index.remove_if(key, |_, bucket| bucket.is_empty());
        }
    }

    fn index_for<'a>(&self, pattern: &'a TopicPattern) -> (&DashMap<String, Bucket>, &'a str) {
        match pattern {
            TopicPattern::Exact(topic) => (&self.exact, topic),
            TopicPattern::Prefix(prefix) => (&self.wildcard, prefix),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .field("exact_buckets", &self.exact.len())
            .field("wildcard_buckets", &self.wildcard.len())
            .finish()
    }
}

/// Byte offsets of every prefix of `topic`, from `""` up to the whole topic.
fn prefix_ends(topic: &str) -> impl Iterator<Item = usize> + '_ {
    topic
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(topic.len()))
}

fn validate(
    topics: &[String],
    filter: Option<&str>,
) -> Result<(Vec<TopicPattern>, Option<Filter>)> {
    if topics.is_empty() {
        return Err(Error::InvalidTopicPattern {
            pattern: String::new(),
            reason: "no topics given".into(),
        });
    }

    let mut patterns: Vec<TopicPattern> = Vec::with_capacity(topics.len());
    for topic in topics {
        let pattern = TopicPattern::parse(topic)?;
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }

    let filter = match filter.map(str::trim) {
        Some(expr) if !expr.is_empty() => Some(Filter::parse(expr)?),
        _ => None,
    };

    Ok((patterns, filter))
}
