//! Identity plus in-memory state reconstructed from events (spec.md §3 "Aggregate",
//! §4.G "Host Bridge").

use crate::AggregateVersion;

/// The `Aggregate` trait is responsible for validating commands, mapping commands to
/// events, and applying events onto state.
///
/// Deliberately synchronous, following the teacher crate's own `Aggregate` trait: if
/// you implement this trait, your aggregate should have no side effects. Anything
/// needed to handle a command correctly should already be in the command by the time
/// it reaches here.
///
/// The spec's "runtime dispatch by snake-cased event class name" design note is
/// addressed by `apply_event` matching on `Self::Event` at compile time rather than by
/// any string lookup — there is exactly one apply function per event variant, chosen
/// by the compiler.
pub trait Aggregate {
    /// Unique name for this aggregate type. Used as `aggregate_type` when persisting
    /// and loading events. Changing this breaks the link to previously persisted
    /// events.
    const NAME: &'static str;

    /// In-memory state, rebuilt by folding events.
    ///
    /// `Serialize + DeserializeOwned` so [`crate::manager::AggregateManager`] can round-trip
    /// it through the Codec for snapshotting (spec.md §4.D).
    type State: Default + Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned;

    /// An action the caller can execute over an aggregate to make it emit events.
    type Command: Send;

    /// A fact describing something that happened; the sole unit of persistence.
    ///
    /// `Serialize + DeserializeOwned` so [`crate::manager::AggregateManager`] can hand
    /// it to the Codec without the host writing its own encode/decode glue; `event_type`
    /// names the wire tag used to pick a variant back out on replay (spec.md §3 "Event",
    /// `event_type`).
    type Event: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned;

    /// Domain errors raised while handling a command. Never a technical/IO error —
    /// those live in [`crate::error::EventStoreError`].
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validate `command` against `state` and produce the events it should emit.
    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold `payload` onto `state`, producing the next state.
    ///
    /// This assumes `payload` can be legally applied to `state`; if an invariant this
    /// function depends on has been broken (e.g. a gap in the persisted event stream),
    /// it is allowed to panic rather than silently diverge.
    fn apply_event(state: Self::State, payload: Self::Event) -> Self::State;

    /// The wire tag stored as `event_type` and used to pick a deserializer on replay
    /// (spec.md §3 "Event", `event_type`: "used to select host deserializer").
    fn event_type(event: &Self::Event) -> &'static str;
}

/// Identity plus in-memory state for one aggregate instance, plus the events it has
/// produced but not yet persisted.
///
/// Distinct from [`Aggregate`] (which is stateless behavior), the way the spec
/// separates "Aggregate" (identity + state) from its command/event types.
pub struct AggregateState<A: Aggregate> {
    id: String,
    current_version: AggregateVersion,
    state: A::State,
    uncommitted_events: Vec<A::Event>,
}

impl<A: Aggregate> AggregateState<A> {
    /// A brand-new aggregate instance with no persisted history.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            current_version: 0,
            state: A::State::default(),
            uncommitted_events: Vec::new(),
        }
    }

    /// Reconstruct from a starting `version`/`state` pair (e.g. a snapshot) plus the
    /// events that occurred after it, applied in order via [`Self::apply_historical`].
    pub fn from_snapshot(id: impl Into<String>, version: AggregateVersion, state: A::State) -> Self {
        Self {
            id: id.into(),
            current_version: version,
            state,
            uncommitted_events: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_version(&self) -> AggregateVersion {
        self.current_version
    }

    pub fn state(&self) -> &A::State {
        &self.state
    }

    /// Fold one historical event onto state and advance `current_version`. Used by
    /// [`crate::manager::AggregateManager::load`] while replaying from the store.
    pub fn apply_historical(&mut self, event: A::Event) {
        self.state = A::apply_event(std::mem::take(&mut self.state), event);
        self.current_version += 1;
    }

    /// Validate and handle `command`, appending its resulting events to the
    /// uncommitted buffer and folding them onto state immediately, so subsequent
    /// commands in the same in-memory session see up-to-date state.
    pub fn handle_command(&mut self, command: A::Command) -> Result<(), A::Error> {
        let events = A::handle_command(&self.state, command)?;
        for event in events {
            self.state = A::apply_event(std::mem::take(&mut self.state), event.clone());
            self.uncommitted_events.push(event);
        }
        Ok(())
    }

    /// Events produced since the last [`Self::mark_events_committed`], in the order
    /// they should be persisted.
    pub fn get_uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted_events
    }

    /// Clear the uncommitted buffer and advance `current_version` by the number of
    /// events that were just durably appended. Called by the host after
    /// [`crate::store::EventStore::save`] returns successfully.
    pub fn mark_events_committed(&mut self) {
        self.current_version += self.uncommitted_events.len() as AggregateVersion;
        self.uncommitted_events.clear();
    }
}

impl<A: Aggregate> std::fmt::Debug for AggregateState<A>
where
    A::State: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateState")
            .field("id", &self.id)
            .field("current_version", &self.current_version)
            .field("state", &self.state)
            .field("uncommitted_events", &self.uncommitted_events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn handle_command_updates_state_and_buffers_event() {
        let mut aggregate = AggregateState::<CounterAggregate>::new("c1");
        aggregate.handle_command(5).unwrap();
        aggregate.handle_command(2).unwrap();

        assert_eq!(aggregate.state().value, 7);
        assert_eq!(aggregate.get_uncommitted_events().len(), 2);
        assert_eq!(aggregate.current_version(), 0);
    }

    #[test]
    fn mark_events_committed_advances_version_and_clears_buffer() {
        let mut aggregate = AggregateState::<CounterAggregate>::new("c1");
        aggregate.handle_command(5).unwrap();
        aggregate.mark_events_committed();

        assert_eq!(aggregate.current_version(), 1);
        assert!(aggregate.get_uncommitted_events().is_empty());
    }

    #[test]
    fn from_snapshot_seeds_version_and_state() {
        let mut aggregate = AggregateState::<CounterAggregate>::from_snapshot("c1", 10, Counter { value: 42 });
        aggregate.apply_historical(CounterEvent::Incremented(1));
        assert_eq!(aggregate.current_version(), 11);
        assert_eq!(aggregate.state().value, 43);
    }
}
