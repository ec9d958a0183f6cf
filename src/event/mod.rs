//! Core event type.
//!
//! An [`Event`] is an immutable value: a `/`-delimited topic plus a map of
//! named properties. Events are shared between delivery sessions behind an
//! `Arc` and never mutated after construction.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

pub mod metadata;

pub use metadata::EventMetadata;

/// Event property map.
pub type Properties = HashMap<String, Value>;

/// A published event.
///
/// # Example
///
/// ```rust
/// use tokio_event_admin::Event;
///
/// let event = Event::builder("org/example/user/CREATED")
///     .property("user", "alice")
///     .property("id", 42)
///     .build()
///     .unwrap();
///
/// assert_eq!(event.topic(), "org/example/user/CREATED");
/// assert_eq!(event.property("id"), Some(&serde_json::json!(42)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    topic: String,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    metadata: EventMetadata,
}

impl Event {
    /// Create a new event.
    ///
    /// Returns [`Error::InvalidTopic`] if `topic` is empty.
    pub fn new(topic: impl Into<String>, properties: Properties) -> Result<Self> {
        Self::with_metadata(topic, properties, EventMetadata::new())
    }

    /// Create a new event with explicit metadata
    pub fn with_metadata(
        topic: impl Into<String>,
        properties: Properties,
        metadata: EventMetadata,
    ) -> Result<Self> {
        let topic = topic.into();
        validate_topic(&topic)?;
        Ok(Self {
            topic,
            properties,
            metadata,
        })
    }

    /// Start building an event for `topic`
    pub fn builder(topic: impl Into<String>) -> EventBuilder {
        EventBuilder::new(topic)
    }

    /// The event topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// All event properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// A single property by name
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Event metadata
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// The unique event ID
    pub fn event_id(&self) -> Uuid {
        self.metadata.event_id
    }

    /// Serialize this event to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize an event from JSON, re-validating the topic
    pub fn from_json(json: &str) -> Result<Self> {
        let event: Self = serde_json::from_str(json)?;
        validate_topic(&event.topic)?;
        Ok(event)
    }
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Builder for [`Event`]
#[derive(Debug)]
pub struct EventBuilder {
    topic: String,
    properties: Properties,
    metadata: EventMetadata,
}

impl EventBuilder {
    /// Create a new event builder
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            properties: Properties::new(),
            metadata: EventMetadata::new(),
        }
    }

    /// Add a single property
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Add all properties from a map
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Set the publisher name
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Mark this event as caused by `parent`
    pub fn caused_by(mut self, parent: &Event) -> Self {
        self.metadata.follow(&parent.metadata);
        self
    }

    /// Build the event
    pub fn build(self) -> Result<Event> {
        Event::with_metadata(self.topic, self.properties, self.metadata)
    }
}
