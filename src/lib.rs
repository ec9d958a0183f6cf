//! # tokio-event-admin
//!
//! A topic-based publish/subscribe event admin built on Tokio.
//!
//! ## Features
//!
//! - **Topic patterns**: exact topics and `prefix*` wildcards
//! - **LDAP filters** over event properties
//! - **Ordered asynchronous delivery** per publisher, with re-entrant
//!   publishes kept on the publishing worker
//! - **Synchronous delivery** that waits for every handler
//! - **Fault isolation**: slow handlers are blacklisted, failing ones are not
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use tokio_event_admin::{Event, EventAdmin};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create the event admin
//!     let admin = EventAdmin::builder().build()?;
//!
//!     // Subscribe to a topic subtree
//!     let handle = admin.subscribe_fn(["org/example/user/*"], None, |event| async move {
//!         println!("{} for {:?}", event.topic(), event.property("email"));
//!         Ok(())
//!     })?;
//!
//!     // Publish events
//!     admin.publish_async(
//!         Event::builder("org/example/user/REGISTERED")
//!             .property("user_id", 123)
//!             .property("email", "user@example.com")
//!             .build()?,
//!     )?;
//!
//!     // Unsubscribe when done
//!     admin.unsubscribe(handle.id())?;
//!     admin.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    unreachable_pub
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Core event type and metadata
pub mod event;

/// Error types and result aliases
pub mod error;

/// LDAP-style property filters
pub mod filter;

/// Handler registry for topic-to-handler mapping
pub mod registry;

/// Subscription state and event handlers
pub mod subscription;

/// Delivery sessions and queues
pub mod dispatcher;

/// The main event admin implementation
pub mod bus;

// Re-export commonly used types
pub use bus::{EventAdmin, EventAdminBuilder, EventAdminConfig, EventAdminStats};
pub use dispatcher::{current_queue, DeliveryReport, QueueKey, WorkerKeyStrategy};
pub use error::{Error, Result};
pub use event::{Event, EventBuilder, EventMetadata, Properties};
pub use filter::Filter;
pub use subscription::{EventHandler, HandlerId, HandlerState, SubscriptionHandle};

/// Prelude module for convenient imports
///
/// # Example
/// ```rust
/// use tokio_event_admin::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bus::{EventAdmin, EventAdminBuilder, EventAdminConfig};
    pub use crate::dispatcher::{DeliveryReport, QueueKey, WorkerKeyStrategy};
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, Properties};
    pub use crate::subscription::{EventHandler, HandlerState, SubscriptionHandle};
}
