//! Error taxonomy shared by every component (spec.md §7).
//!
//! Recoverable errors ([`EventStoreError::ConcurrencyConflict`], [`EventStoreError::Lagged`],
//! [`EventStoreError::Timeout`]) are meant to be matched on and acted upon by callers.
//! Structural errors ([`EventStoreError::SnapshotCorrupt`], [`EventStoreError::SchemaMismatch`])
//! are meant to be logged and surfaced, not silently retried.

use crate::{AggregateVersion, GlobalPosition};

/// The single error type returned by every public `eventflux` operation.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Another writer advanced the aggregate between load and save. The caller should
    /// reload the aggregate and retry the command.
    #[error("concurrency conflict on aggregate: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        expected: AggregateVersion,
        actual: AggregateVersion,
    },

    /// The requested aggregate or snapshot does not exist.
    #[error("not found")]
    NotFound,

    /// Connection, I/O, or constraint failure from the backend. The transaction (if
    /// any) has already been rolled back; the operation is safe to retry.
    #[error("backend error: {0}")]
    Backend(#[from] sqlx::Error),

    /// Payload failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A snapshot's stored checksum does not match its content. The row is treated as
    /// invalid; callers should fall back to a full replay.
    #[error("snapshot for aggregate {aggregate_id} at version {version} failed checksum verification")]
    SnapshotCorrupt {
        aggregate_id: String,
        version: AggregateVersion,
    },

    /// A streamer subscriber's buffer overflowed; `skipped` events were dropped for
    /// that subscriber only. The consumer must resync via the event log.
    #[error("subscriber lagged, {skipped} events dropped")]
    Lagged { skipped: u64 },

    /// The operation's deadline expired before completion. No partial durable writes
    /// occurred.
    #[error("operation timed out")]
    Timeout,

    /// The persistent schema version is not compatible with this build of the engine.
    #[error("schema mismatch: engine expects version {expected}, database reports {actual}")]
    SchemaMismatch { expected: i64, actual: i64 },

    /// A connection string could not be parsed into a [`crate::store::BackendConfig`].
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
}

impl EventStoreError {
    /// Structural errors are ones that indicate corruption or version skew rather than
    /// ordinary contention; see spec.md §7's propagation policy.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EventStoreError::SnapshotCorrupt { .. } | EventStoreError::SchemaMismatch { .. }
        )
    }

    /// Recoverable errors are safe for the caller to retry, typically after reloading
    /// state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. }
                | EventStoreError::Lagged { .. }
                | EventStoreError::Timeout
        )
    }
}

/// Errors raised by [`crate::codec`] implementations.
///
/// During replay a `CodecError` should not abort an entire batch: callers are expected
/// to fall back to a raw-fields carrier and keep going (spec.md §4.A, §7). During
/// writes it fails the operation outright.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed payload for event type {event_type}: {reason}")]
    Malformed { event_type: String, reason: String },

    #[error("no deserializer registered for event type {0}")]
    UnknownType(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] Box<bincode::ErrorKind>),
}

/// Errors raised by [`crate::snapshot`].
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("checksum mismatch for aggregate {aggregate_id} at version {version}")]
    ChecksumMismatch {
        aggregate_id: String,
        version: AggregateVersion,
    },
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

impl From<SnapshotError> for EventStoreError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::ChecksumMismatch { aggregate_id, version } => {
                EventStoreError::SnapshotCorrupt { aggregate_id, version }
            }
            SnapshotError::Compression(io) => EventStoreError::Backend(sqlx::Error::Io(io)),
            SnapshotError::Codec(codec) => EventStoreError::Codec(codec),
            SnapshotError::Backend(err) => EventStoreError::Backend(err),
        }
    }
}

/// A position in the log, published alongside every committed event (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamPosition {
    pub stream_position: AggregateVersion,
    pub global_position: GlobalPosition,
}
