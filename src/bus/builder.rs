//! Builder pattern for constructing EventAdmin instances.

use super::{EventAdmin, Inner};
use crate::bus::config::EventAdminConfig;
use crate::dispatcher::channel::QueueSettings;
use crate::dispatcher::{DeliveryContext, DeliveryMetrics, QueuePool, WorkerKeyStrategy};
use crate::registry::HandlerRegistry;
use crate::{Error, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// Builder for creating EventAdmin instances
#[derive(Debug, Default)]
pub struct EventAdminBuilder {
    config: EventAdminConfig,
    registry: Option<Arc<HandlerRegistry>>,
    runtime: Option<Handle>,
}

impl EventAdminBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom configuration
    pub fn config(mut self, config: EventAdminConfig) -> Self {
        self.config = config;
        self
    }

    /// Configure the event admin
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(EventAdminConfig) -> EventAdminConfig,
    {
        self.config = f(self.config);
        self
    }

    /// Share an existing registry
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Spawn queue workers on `runtime` instead of the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the per-handler timeout; `Duration::ZERO` disables it
    pub fn per_handler_timeout(self, timeout: Duration) -> Self {
        self.configure(|c| c.per_handler_timeout(timeout))
    }

    /// Set the worker key strategy
    pub fn worker_key_strategy(self, strategy: WorkerKeyStrategy) -> Self {
        self.configure(|c| c.worker_key_strategy(strategy))
    }

    /// Build with a single shared queue
    pub fn ordered(self) -> Self {
        self.config(EventAdminConfig::ordered())
    }

    /// Build with a hashed queue pool
    pub fn pooled(self) -> Self {
        self.config(EventAdminConfig::pooled())
    }

    /// Build the EventAdmin.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ConfigError`] for an invalid configuration or when
    /// no runtime was given and none is running.
    pub fn build(self) -> Result<EventAdmin> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| Error::ConfigError(format!("no Tokio runtime available: {e}")))?,
        };

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(HandlerRegistry::with_capacity(64)));
        let metrics = Arc::new(DeliveryMetrics::default());

        let context = DeliveryContext {
            registry: registry.clone(),
            timeout: self.config.handler_timeout(),
            require_in_time: self.config.require_in_time,
            metrics: metrics.clone(),
        };
        let queues = QueuePool::new(
            QueueSettings {
                capacity: self.config.queue_capacity,
                drop_on_full: self.config.drop_on_full,
            },
            context.clone(),
            runtime,
        );

        info!(
            strategy = ?self.config.worker_key_strategy,
            timeout_ms = self.config.per_handler_timeout_ms,
            "EventAdmin built"
        );

        Ok(EventAdmin {
            inner: Arc::new(Inner {
                config: self.config,
                registry,
                context,
                queues,
                metrics,
                is_shutting_down: AtomicBool::new(false),
            }),
        })
    }
}
