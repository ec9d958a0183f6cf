//! Event handler traits and implementations.

use crate::{Event, Result};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;

/// Trait for event handlers.
///
/// Returning `Err` reports a runtime fault: it is logged and the handler
/// keeps receiving events. A handler may be invoked concurrently with
/// itself by different delivery queues.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Process an event
    async fn handle(&self, event: &Event) -> Result<()>;

    /// Get the handler name for debugging
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// A closure-based event handler.
///
/// The closure receives its own copy of the event.
pub struct FunctionHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    function: F,
    name: String,
}

impl<F, Fut> FunctionHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Create a new function handler
    pub fn new(function: F) -> Self {
        Self::with_name(function, "FunctionHandler")
    }

    /// Create a new function handler with a custom name
    pub fn with_name(function: F, name: impl Into<String>) -> Self {
        Self {
            function,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FunctionHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<()> {
        (self.function)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut> fmt::Debug for FunctionHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionHandler")
            .field("name", &self.name)
            .finish()
    }
}

/// Delivery statistics for one handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// Invocations that completed successfully
    pub delivered: u64,
    /// Invocations that returned an error, panicked or timed out
    pub failed: u64,
}

impl fmt::Display for HandlerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delivered: {}, Failed: {}", self.delivered, self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_function_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let handler = FunctionHandler::new(move |event: Event| {
            let seen = seen_clone.clone();
            async move {
                assert_eq!(event.topic(), "a/b");
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event = Event::builder("a/b").build().unwrap();
        handler.handle(&event).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(handler.name(), "FunctionHandler");
    }

    #[tokio::test]
    async fn test_function_handler_error_propagates() {
        let handler =
            FunctionHandler::with_name(|_| async { Err(Error::handler("nope")) }, "failing");
        let event = Event::builder("a").build().unwrap();
        let err = handler.handle(&event).await.unwrap_err();
        assert!(matches!(err, Error::HandlerError(_)));
        assert_eq!(handler.name(), "failing");
    }

    #[test]
    fn test_handler_stats_display() {
        let stats = HandlerStats {
            delivered: 3,
            failed: 1,
        };
        assert_eq!(stats.to_string(), "Delivered: 3, Failed: 1");
    }
}
