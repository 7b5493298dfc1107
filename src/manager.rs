//! Host Bridge: glue between an [`Aggregate`] and the engine (spec.md §4.G).
//!
//! Single responsibility per the spec: marshal typed host events in and out of the
//! engine's opaque, codec-encoded [`Event`]/[`UncommittedEvent`] without copying payload
//! bytes twice, and drive the `get_uncommitted_events` / `mark_events_committed` /
//! `apply_event` lifecycle hooks on the host's behalf. This is the generalization noted
//! in `crate::store`'s module doc: the teacher's stores are generic over the host event
//! type directly, this crate isolates that genericity here instead so the same
//! `EventStore` trait object serves every aggregate type.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;

use crate::aggregate::{Aggregate, AggregateState};
use crate::codec::{self, Encoding};
use crate::error::EventStoreError;
use crate::event::{Event, UncommittedEvent};
use crate::snapshot::SnapshotPolicy;
use crate::store::EventStore;
use crate::AggregateVersion;

/// Loads, saves, and snapshots instances of one [`Aggregate`] type over a shared
/// [`EventStore`].
pub struct AggregateManager<A: Aggregate> {
    store: Arc<dyn EventStore>,
    encoding: Encoding,
    snapshot_policy: SnapshotPolicy,
    _aggregate: PhantomData<A>,
}

impl<A: Aggregate> AggregateManager<A> {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store, encoding: Encoding::Binary, snapshot_policy: SnapshotPolicy::default(), _aggregate: PhantomData }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Rehydrate the aggregate identified by `id` (spec.md data flow for a read: "host
    /// request → Event Store (load events by id, optionally from snapshot) → Snapshot
    /// Store (latest snapshot) → host aggregate (rehydrate)").
    ///
    /// Returns `Ok(None)` if `id` has neither a snapshot nor any events — i.e. it has
    /// never existed.
    pub async fn load(&self, id: &str) -> Result<Option<AggregateState<A>>, EventStoreError> {
        let snapshot = self.store.snapshots().latest(id).await?;

        let mut found_anything = snapshot.is_some();
        let mut state = match snapshot {
            Some(snapshot) => {
                let decoded: A::State =
                    codec::decode_typed(A::NAME, &snapshot.state_bytes, self.encoding).map_err(EventStoreError::Codec)?;
                AggregateState::from_snapshot(id, snapshot.aggregate_version, decoded)
            }
            None => AggregateState::new(id),
        };

        let from_version = state.current_version();
        let mut events = self.store.load_events(id, Some(from_version));
        while let Some(event) = events.next().await {
            let event = event?;
            found_anything = true;
            let payload: A::Event =
                codec::decode_typed(&event.event_type, &event.payload, event.payload_encoding).map_err(EventStoreError::Codec)?;
            state.apply_historical(payload);
        }

        if !found_anything {
            return Ok(None);
        }
        Ok(Some(state))
    }

    /// Persist `state`'s uncommitted events (spec.md §4.C `save` steps 1-7) and clear the
    /// buffer on success. An empty buffer is a no-op that does not touch the store.
    pub async fn save(&self, state: &mut AggregateState<A>) -> Result<Vec<Event>, EventStoreError> {
        if state.get_uncommitted_events().is_empty() {
            return Ok(Vec::new());
        }

        let mut to_persist = Vec::with_capacity(state.get_uncommitted_events().len());
        for event in state.get_uncommitted_events() {
            let payload = codec::encode(event, self.encoding).map_err(EventStoreError::Codec)?;
            to_persist.push(UncommittedEvent::new(A::event_type(event), payload, self.encoding));
        }

        let committed = self.store.save(state.id(), A::NAME, state.current_version(), to_persist).await?;
        state.mark_events_committed();
        Ok(committed)
    }

    /// Whether the host should call [`Self::snapshot`] for an aggregate now at
    /// `version`, per this manager's [`SnapshotPolicy::frequency`] (spec.md §4.F:
    /// snapshot creation is host-driven, the engine only exposes the policy as data).
    pub fn should_snapshot(&self, version: AggregateVersion) -> bool {
        self.snapshot_policy.frequency != 0 && version > 0 && version as u64 % self.snapshot_policy.frequency == 0
    }

    /// Encode and persist `state`'s current state as a snapshot at its current version.
    pub async fn snapshot(&self, state: &AggregateState<A>) -> Result<(), EventStoreError> {
        let bytes = codec::encode(state.state(), self.encoding).map_err(EventStoreError::Codec)?;
        self.store.snapshots().save(state.id(), A::NAME, state.current_version(), &bytes).await?;
        Ok(())
    }

    /// Non-transactional read of the current persisted version for `id`.
    pub async fn current_version(&self, id: &str) -> Result<Option<AggregateVersion>, EventStoreError> {
        self.store.current_version(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteEventStore;
    use crate::store::{BackendConfig, SqlitePath};

    #[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Counter {
        value: i64,
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    enum CounterEvent {
        Incremented(i64),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter error")]
    struct CounterError;

    struct CounterAggregate;

    impl Aggregate for CounterAggregate {
        const NAME: &'static str = "counter";
        type State = Counter;
        type Command = i64;
        type Event = CounterEvent;
        type Error = CounterError;

        fn handle_command(_state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            Ok(vec![CounterEvent::Incremented(command)])
        }

        fn apply_event(state: Self::State, payload: Self::Event) -> Self::State {
            match payload {
                CounterEvent::Incremented(by) => Counter { value: state.value + by },
            }
        }

        fn event_type(event: &Self::Event) -> &'static str {
            match event {
                CounterEvent::Incremented(_) => "incremented",
            }
        }
    }

    async fn manager() -> AggregateManager<CounterAggregate> {
        let config = BackendConfig::Sqlite { path: SqlitePath::Memory, pool_size: None };
        let store = SqliteEventStore::connect(config, 16).await.unwrap();
        store.run_schema().await.unwrap();
        AggregateManager::new(Arc::new(store))
    }

    #[tokio::test]
    async fn load_missing_aggregate_returns_none() {
        let manager = manager().await;
        assert!(manager.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state() {
        let manager = manager().await;
        let mut state = AggregateState::<CounterAggregate>::new("c1");
        state.handle_command(5).unwrap();
        state.handle_command(3).unwrap();
        manager.save(&mut state).await.unwrap();

        let reloaded = manager.load("c1").await.unwrap().unwrap();
        assert_eq!(reloaded.state().value, 8);
        assert_eq!(reloaded.current_version(), 2);
    }

    #[tokio::test]
    async fn snapshot_then_load_skips_full_replay() {
        let manager = manager().await;
        let mut state = AggregateState::<CounterAggregate>::new("c1");
        state.handle_command(10).unwrap();
        manager.save(&mut state).await.unwrap();
        manager.snapshot(&state).await.unwrap();

        state.handle_command(1).unwrap();
        manager.save(&mut state).await.unwrap();

        let reloaded = manager.load("c1").await.unwrap().unwrap();
        assert_eq!(reloaded.state().value, 11);
        assert_eq!(reloaded.current_version(), 2);
    }

    #[tokio::test]
    async fn should_snapshot_honors_frequency() {
        let config = BackendConfig::Sqlite { path: SqlitePath::Memory, pool_size: None };
        let store = SqliteEventStore::connect(config, 16).await.unwrap();
        store.run_schema().await.unwrap();
        let manager = AggregateManager::<CounterAggregate>::new(Arc::new(store))
            .with_snapshot_policy(SnapshotPolicy { frequency: 10, compression: true, max_snapshots: 100 });

        assert!(!manager.should_snapshot(5));
        assert!(manager.should_snapshot(10));
        assert!(!manager.should_snapshot(0));
    }
}
