//! Property test 4 (spec.md §8): of K concurrent `save` attempts against the same
//! aggregate starting from the same expected version, exactly one succeeds and K-1
//! fail with `ConcurrencyConflict`.

use std::sync::Arc;
use std::time::Duration;

use eventflux::codec::Encoding;
use eventflux::event::UncommittedEvent;
use eventflux::store::{BackendConfig, EventStore, SqlitePath};
use rand::Rng;

#[tokio::test]
async fn scenario_2_concurrent_writers_one_wins() {
    const K: usize = 10;

    let config = BackendConfig::Sqlite { path: SqlitePath::Memory, pool_size: Some(K as u32) };
    let store = eventflux::store::sqlite::SqliteEventStore::connect(config, 16).await.unwrap();
    store.run_schema().await.unwrap();
    let store: Arc<dyn EventStore> = Arc::new(store);

    store
        .save("agg-1", "test", 0, vec![UncommittedEvent::new("Seed", b"{}".to_vec(), Encoding::Json)])
        .await
        .unwrap();
    let expected_version = store.current_version("agg-1").await.unwrap().unwrap();

    let mut handles = Vec::with_capacity(K);
    for _ in 0..K {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            // Randomized jitter widens the window in which writers race each other
            // against the writer semaphore / current_version check.
            let jitter_micros = rand::thread_rng().gen_range(0..2_000);
            tokio::time::sleep(Duration::from_micros(jitter_micros)).await;
            store
                .save("agg-1", "test", expected_version, vec![UncommittedEvent::new("Raced", b"{}".to_vec(), Encoding::Json)])
                .await
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let conflicted = results
        .iter()
        .filter(|r| matches!(r, Err(eventflux::EventStoreError::ConcurrencyConflict { .. })))
        .count();

    assert_eq!(succeeded, 1, "exactly one writer should win the race");
    assert_eq!(conflicted, K - 1, "every other writer should see a ConcurrencyConflict");
    assert_eq!(store.current_version("agg-1").await.unwrap(), Some(expected_version + 1));
}
