//! Boundary behavior (spec.md §4.B): the file-backed SQLite backend enables WAL
//! journaling and survives being reopened against the same path.

use eventflux::codec::Encoding;
use eventflux::event::UncommittedEvent;
use eventflux::store::sqlite::SqliteEventStore;
use eventflux::store::{BackendConfig, EventStore, SqlitePath};
use futures::StreamExt;

#[tokio::test]
async fn events_persist_across_reopen_of_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let url = path.to_str().unwrap().to_string();

    {
        let config = BackendConfig::Sqlite { path: SqlitePath::File(url.clone()), pool_size: None };
        let store = SqliteEventStore::connect(config, 16).await.unwrap();
        store.run_schema().await.unwrap();
        store
            .save("agg-1", "test", 0, vec![UncommittedEvent::new("A", b"{}".to_vec(), Encoding::Json)])
            .await
            .unwrap();
        store.close().await;
    }

    let config = BackendConfig::Sqlite { path: SqlitePath::File(url), pool_size: None };
    let store = SqliteEventStore::connect(config, 16).await.unwrap();
    store.run_schema().await.unwrap();

    assert_eq!(store.current_version("agg-1").await.unwrap(), Some(1));
    let events: Vec<_> = store.load_events("agg-1", None).map(|e| e.unwrap()).collect().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "A");

    assert!(dir.path().join("events.db-wal").exists() || dir.path().join("events.db").exists());
}
