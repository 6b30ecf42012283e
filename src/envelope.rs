use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Event, Guid, Result, TypeRegistry};

/// Correlation and causation ids stamped on every envelope of a save.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    /// Groups related events across aggregates.
    pub correlation_id: Guid,
    /// What command/event caused this.
    pub causation_id: Guid,
}

impl Correlation {
    /// Starts a new correlation; the root message is its own cause.
    pub fn new() -> Self {
        let id = Guid::new();
        Self {
            correlation_id: id,
            causation_id: id,
        }
    }

    /// A follow-up caused by `causation_id` within this correlation.
    pub fn caused_by(self, causation_id: Guid) -> Self {
        Self {
            correlation_id: self.correlation_id,
            causation_id,
        }
    }
}

impl Default for Correlation {
    fn default() -> Self {
        Self::new()
    }
}

/// The `Envelope` struct is the persisted form of one event.
///
/// The body is the JSON serialization of the concrete event and `event_type` is the tag that
/// maps it back to that type through a [`TypeRegistry`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The ID of the event.
    pub event_id: Guid,

    /// The ID of the aggregate that the event is associated with.
    pub aggregate_id: Guid,

    /// The type name of the aggregate.
    pub aggregate_type: String,

    /// The type tag of the event.
    pub event_type: String,

    /// The serialized event.
    pub body: String,

    /// The logical version of the event in its aggregate stream.
    pub version: i64,

    /// The timestamp of the event.
    pub timestamp: DateTime<Utc>,

    pub correlation_id: Guid,

    pub causation_id: Guid,
}

impl Envelope {
    /// Wraps `event` at the given logical version.
    ///
    /// The event itself is not touched; the version is recorded on the envelope and stamped
    /// onto the serialized body.
    pub fn seal(
        event: &dyn Event,
        aggregate_type: &str,
        aggregate_id: Guid,
        version: i64,
        correlation: Correlation,
    ) -> Result<Self> {
        let mut versioned = event.clone_event();
        versioned.set_version(version);

        Ok(Self {
            event_id: event.event_id(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: event.event_type().to_string(),
            body: versioned.to_body()?,
            version,
            timestamp: Utc::now(),
            correlation_id: correlation.correlation_id,
            causation_id: correlation.causation_id,
        })
    }

    /// Recovers the concrete event through `registry`.
    ///
    /// The envelope's version is authoritative and overrides whatever the body carries.
    pub fn open(&self, registry: &TypeRegistry) -> Result<Box<dyn Event>> {
        let mut event = registry.decode(&self.event_type, &self.body)?;
        event.set_version(self.version);
        Ok(event)
    }
}
