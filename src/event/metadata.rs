//! Identity, creation time and provenance of an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every published event.
///
/// The timestamp is fixed when the event is built, not when it is delivered;
/// the optional "in time" delivery policy compares it with each handler's
/// subscription time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique per event
    pub event_id: Uuid,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Publisher name, e.g. the bundle that posted the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Event whose handler published this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
}

impl EventMetadata {
    /// Fresh id, created now
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Fresh id with an explicit creation time
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp,
            source: None,
            causation_id: None,
        }
    }

    /// Name the publisher
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Record `parent` as the cause. The parent's source is inherited
    /// unless one was already set.
    pub fn follow(&mut self, parent: &EventMetadata) {
        self.causation_id = Some(parent.event_id);
        if self.source.is_none() {
            self.source.clone_from(&parent.source);
        }
    }

    /// Whether the event was created strictly before `instant`
    pub fn created_before(&self, instant: DateTime<Utc>) -> bool {
        self.timestamp < instant
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}
