//! End-to-end scenarios 1-3 (spec.md §8): register/change/deactivate, concurrency
//! conflict, and snapshot round-trip, all against the in-memory SQLite backend.

use std::sync::Arc;

use eventflux::store::{BackendConfig, EventStore, SqlitePath};
use eventflux::{Aggregate, AggregateManager, AggregateState, EventStoreError};

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct UserState {
    name: String,
    email: String,
    is_active: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
enum UserEvent {
    Registered { name: String, email: String },
    EmailChanged { old: String, new: String },
    Deactivated { reason: String },
}

#[derive(Debug, Clone)]
enum UserCommand {
    Register { name: String, email: String },
    ChangeEmail { new: String },
    Deactivate { reason: String },
}

#[derive(Debug, thiserror::Error)]
enum UserError {
    #[error("user already registered")]
    AlreadyRegistered,
}

struct UserAggregate;

impl Aggregate for UserAggregate {
    const NAME: &'static str = "user";
    type State = UserState;
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = UserError;

    fn handle_command(state: &Self::State, command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Register { name, email } => {
                if !state.email.is_empty() {
                    return Err(UserError::AlreadyRegistered);
                }
                Ok(vec![UserEvent::Registered { name, email }])
            }
            UserCommand::ChangeEmail { new } => Ok(vec![UserEvent::EmailChanged { old: state.email.clone(), new }]),
            UserCommand::Deactivate { reason } => Ok(vec![UserEvent::Deactivated { reason }]),
        }
    }

    fn apply_event(state: Self::State, payload: Self::Event) -> Self::State {
        match payload {
            UserEvent::Registered { name, email } => UserState { name, email, is_active: true },
            UserEvent::EmailChanged { new, .. } => UserState { email: new, ..state },
            UserEvent::Deactivated { .. } => UserState { is_active: false, ..state },
        }
    }

    fn event_type(event: &Self::Event) -> &'static str {
        match event {
            UserEvent::Registered { .. } => "UserRegistered",
            UserEvent::EmailChanged { .. } => "UserEmailChanged",
            UserEvent::Deactivated { .. } => "UserDeactivated",
        }
    }
}

async fn fresh_store() -> Arc<dyn EventStore> {
    let config = BackendConfig::Sqlite { path: SqlitePath::Memory, pool_size: None };
    let store = eventflux::store::sqlite::SqliteEventStore::connect(config, 64).await.unwrap();
    store.run_schema().await.unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn scenario_1_register_change_deactivate() {
    let store = fresh_store().await;
    let manager = AggregateManager::<UserAggregate>::new(store.clone());

    let mut state = AggregateState::<UserAggregate>::new("user-1");
    state.handle_command(UserCommand::Register { name: "Alice".into(), email: "a@x".into() }).unwrap();
    state.handle_command(UserCommand::ChangeEmail { new: "b@x".into() }).unwrap();
    state.handle_command(UserCommand::Deactivate { reason: "closed".into() }).unwrap();
    manager.save(&mut state).await.unwrap();

    let reloaded = manager.load("user-1").await.unwrap().unwrap();
    assert_eq!(reloaded.current_version(), 3);
    assert!(!reloaded.state().is_active);
    assert_eq!(reloaded.state().email, "b@x");

    let events: Vec<_> = {
        use futures::StreamExt;
        store.load_events("user-1", None).map(|e| e.unwrap()).collect().await
    };
    assert_eq!(events.len(), 3);
    assert_eq!(events.iter().map(|e| e.aggregate_version).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(events[0].event_type, "UserRegistered");
    assert_eq!(events[1].event_type, "UserEmailChanged");
    assert_eq!(events[2].event_type, "UserDeactivated");
}

#[tokio::test]
async fn scenario_2_concurrency_conflict() {
    let store = fresh_store().await;
    let manager = AggregateManager::<UserAggregate>::new(store.clone());

    let mut seed = AggregateState::<UserAggregate>::new("user-2");
    for _ in 0..5 {
        seed.handle_command(UserCommand::ChangeEmail { new: "x@x".into() }).unwrap();
    }
    manager.save(&mut seed).await.unwrap();
    assert_eq!(seed.current_version(), 5);

    let mut writer_a = manager.load("user-2").await.unwrap().unwrap();
    let mut writer_b = manager.load("user-2").await.unwrap().unwrap();
    assert_eq!(writer_a.current_version(), 5);
    assert_eq!(writer_b.current_version(), 5);

    writer_a.handle_command(UserCommand::ChangeEmail { new: "a@x".into() }).unwrap();
    writer_b.handle_command(UserCommand::ChangeEmail { new: "b@x".into() }).unwrap();

    manager.save(&mut writer_a).await.unwrap();
    assert_eq!(writer_a.current_version(), 6);

    let err = manager.save(&mut writer_b).await.unwrap_err();
    match err {
        EventStoreError::ConcurrencyConflict { expected, actual } => {
            assert_eq!(expected, 5);
            assert_eq!(actual, 6);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_3_snapshot_round_trip() {
    let store = fresh_store().await;
    let manager = AggregateManager::<UserAggregate>::new(store.clone());

    let mut state = AggregateState::<UserAggregate>::new("user-3");
    state.handle_command(UserCommand::Register { name: "Alice".into(), email: "a@x".into() }).unwrap();
    manager.save(&mut state).await.unwrap();

    for i in 0..199 {
        state.handle_command(UserCommand::ChangeEmail { new: format!("v{i}@x") }).unwrap();
    }
    manager.save(&mut state).await.unwrap();
    assert_eq!(state.current_version(), 200);

    manager.snapshot(&state).await.unwrap();

    for i in 0..50 {
        state.handle_command(UserCommand::ChangeEmail { new: format!("w{i}@x") }).unwrap();
    }
    manager.save(&mut state).await.unwrap();
    assert_eq!(state.current_version(), 250);

    let from_snapshot = manager.load("user-3").await.unwrap().unwrap();
    assert_eq!(from_snapshot.current_version(), 250);
    assert_eq!(from_snapshot.state(), state.state());

    let snapshot = store.snapshots().latest("user-3").await.unwrap().unwrap();
    assert!(snapshot.compression_ratio() <= 1.0);
}
