//! Operational surface invoked by a host CLI/tool (spec.md §6 "Operational surface").
//!
//! Thin wrappers over the §4 contracts; none of them do exit-code handling or output
//! formatting — that stays a host concern, per spec.md §1's explicit scope boundary.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::error::EventStoreError;
use crate::event::Event;
use crate::projection::ProjectionHandler;
use crate::projection::{ProjectionRunner, RunSummary};
use crate::store::{self, EventStore, CURRENT_SCHEMA_VERSION};
use crate::streamer::Subscription;
use crate::{AggregateVersion, GlobalPosition};

/// Connect to `url` and idempotently run the schema migration (spec.md §6 `init(url)`).
pub async fn init(url: &str, streamer_capacity: usize) -> Result<Box<dyn EventStore>, EventStoreError> {
    let store = store::connect(url, streamer_capacity).await?;
    store.run_schema().await?;
    Ok(store)
}

/// Run the schema migration step, failing with [`EventStoreError::SchemaMismatch`] if
/// `target_version` isn't the version this build of the engine understands (spec.md §6
/// `migrate(target_version)`).
pub async fn migrate(store: &dyn EventStore, target_version: i64) -> Result<(), EventStoreError> {
    if target_version != CURRENT_SCHEMA_VERSION {
        return Err(EventStoreError::SchemaMismatch { expected: CURRENT_SCHEMA_VERSION, actual: target_version });
    }
    store.run_schema().await
}

/// Bounds for [`query`]; all fields optional (spec.md §6 `query(aggregate_id?,
/// from_version?, to_version?, limit?)`).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub aggregate_id: Option<String>,
    pub from_version: Option<AggregateVersion>,
    pub to_version: Option<AggregateVersion>,
    pub limit: Option<usize>,
}

/// Read events matching `filter`. When `aggregate_id` is absent, scans the whole log in
/// `global_position` order instead of one aggregate's stream in `aggregate_version` order.
pub async fn query(store: &dyn EventStore, filter: QueryFilter) -> Result<Vec<Event>, EventStoreError> {
    let mut out = Vec::new();

    let mut stream = match &filter.aggregate_id {
        Some(id) => store.load_events(id, filter.from_version),
        None => store.load_all_events(filter.from_version),
    };

    while let Some(event) = stream.next().await {
        let event = event?;
        if let Some(to_version) = filter.to_version {
            if event.aggregate_version > to_version {
                break;
            }
        }
        out.push(event);
        if filter.limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
    }

    Ok(out)
}

/// Replay a subscription's handler from `from_position` (or its last checkpoint if
/// absent) through the current tip (spec.md §6 `replay(projection_id, from_position?)`).
pub async fn replay<H: ProjectionHandler>(
    store: Arc<dyn EventStore>,
    subscription: Subscription,
    handler: H,
    from_position: Option<GlobalPosition>,
) -> Result<RunSummary, EventStoreError> {
    let subscription_id = subscription.id.clone();
    if let Some(from_position) = from_position {
        let rewound = from_position.saturating_sub(1);
        store.save_checkpoint(&subscription_id, rewound).await?;
    }
    let runner = ProjectionRunner::new(store, subscription, handler);
    runner.catch_up().await
}

/// Result of a [`benchmark`] run.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkResult {
    pub operations_run: u64,
    pub elapsed: Duration,
    pub throughput_eps: f64,
}

/// Repeatedly invoke `operation` for up to `duration`, optionally pacing to
/// `target_eps`, and report achieved throughput (spec.md §6 `benchmark(duration,
/// target_eps, operations)`). `operation` is whatever the host wants measured — a
/// single `save`, a `load`, a round-trip — this harness only owns timing and pacing.
pub async fn benchmark<F, Fut>(duration: Duration, target_eps: Option<f64>, mut operation: F) -> Result<BenchmarkResult, EventStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), EventStoreError>>,
{
    let start = Instant::now();
    let mut operations_run = 0u64;

    while start.elapsed() < duration {
        operation().await?;
        operations_run += 1;

        if let Some(target_eps) = target_eps {
            let expected_elapsed = Duration::from_secs_f64(operations_run as f64 / target_eps);
            let actual_elapsed = start.elapsed();
            if expected_elapsed > actual_elapsed {
                tokio::time::sleep(expected_elapsed - actual_elapsed).await;
            }
        }
    }

    let elapsed = start.elapsed();
    let throughput_eps = if elapsed.as_secs_f64() > 0.0 { operations_run as f64 / elapsed.as_secs_f64() } else { 0.0 };
    Ok(BenchmarkResult { operations_run, elapsed, throughput_eps })
}
