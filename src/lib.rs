//! `eventflux` is an append-only event store for building event-sourced aggregates.
//!
//! It couples a durable, optimistically-concurrent event log (backed by Postgres or
//! SQLite, behind the same [`store::EventStore`] contract) with an in-process
//! publish/subscribe layer ([`streamer`]) that drives read-model projections
//! ([`projection`]), and a snapshot subsystem ([`snapshot`]) for fast aggregate
//! reconstruction.
//!
//! The crate does not know anything about your domain: you implement [`aggregate::Aggregate`]
//! for your own state/command/event types, register your event classes with the
//! [`registry::EventRegistry`], and let [`manager::AggregateManager`] glue the pieces
//! together.

pub mod aggregate;
pub mod codec;
pub mod error;
pub mod event;
pub mod manager;
pub mod ops;
pub mod projection;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod streamer;

pub use aggregate::{Aggregate, AggregateState};
pub use error::EventStoreError;
pub use event::{Event, EventMetadata, UncommittedEvent};
pub use manager::AggregateManager;
pub use registry::EventRegistry;
pub use snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};
pub use store::{BackendConfig, EventStore};
pub use streamer::{StreamEvent, Streamer, Subscription};

/// 1-based, contiguous-per-aggregate version counter.
pub type AggregateVersion = i64;

/// Store-wide monotonically increasing position assigned at commit time.
pub type GlobalPosition = i64;
