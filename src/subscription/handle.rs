//! Receipt returned by `EventAdmin::subscribe`.

use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a registered handler.
pub type HandlerId = Uuid;

/// Names a subscription as it was requested.
///
/// The handle is a plain value: it does not keep the handler alive and
/// dropping it does not unsubscribe. The topics are those passed to
/// `subscribe`; later `update` calls are not reflected here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: HandlerId,
    name: String,
    topics: Vec<String>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: HandlerId, name: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            topics,
        }
    }

    /// Handler id, for `unsubscribe`, `update` and state queries
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Handler name, as reported by `EventHandler::name`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topic patterns requested at subscription time
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

impl From<&SubscriptionHandle> for HandlerId {
    fn from(handle: &SubscriptionHandle) -> Self {
        handle.id
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] on {}", self.name, self.id, self.topics.join(", "))
    }
}
