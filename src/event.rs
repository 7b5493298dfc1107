//! The atomic unit of persistence (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Encoding;
use crate::{AggregateVersion, GlobalPosition};

/// Provenance fields carried alongside an event. Grouped into one struct (rather than
/// three bare `Option<Uuid>` fields on [`Event`]) after `eventuali-core`'s
/// `EventMetadata`, which the spec's data model traces back to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMetadata {
    pub causation_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<String>,
}

/// An event as handed to the store by the host, before `aggregate_version`,
/// `event_id`, and `timestamp` have necessarily been filled in.
///
/// [`crate::store::EventStore::save`] assigns any of these three fields that are left
/// unset (spec.md §4.C step 4).
#[derive(Debug, Clone)]
pub struct UncommittedEvent {
    pub event_id: Option<Uuid>,
    pub event_type: String,
    pub event_version: i32,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: EventMetadata,
    pub payload: Vec<u8>,
    pub payload_encoding: Encoding,
}

impl UncommittedEvent {
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>, payload_encoding: Encoding) -> Self {
        Self {
            event_id: None,
            event_type: event_type.into(),
            event_version: 1,
            timestamp: None,
            metadata: EventMetadata::default(),
            payload,
            payload_encoding,
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_event_version(mut self, version: i32) -> Self {
        self.event_version = version;
        self
    }
}

/// A fully committed, immutable event (spec.md §3).
///
/// `aggregate_version` values for a given `aggregate_id` are a contiguous `1..N`
/// sequence; `global_position` is monotonically increasing across the whole store.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub event_version: i32,
    pub aggregate_version: AggregateVersion,
    pub global_position: GlobalPosition,
    pub timestamp: DateTime<Utc>,
    pub metadata: EventMetadata,
    pub payload: Vec<u8>,
    pub payload_encoding: Encoding,
}

impl Event {
    /// `(stream_position, global_position)`, published to the streamer on commit.
    pub fn stream_position(&self) -> crate::error::StreamPosition {
        crate::error::StreamPosition {
            stream_position: self.aggregate_version,
            global_position: self.global_position,
        }
    }
}
