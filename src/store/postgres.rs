//! Networked client-server backend (spec.md §4.B "Backends recognized").
//!
//! `global_position` is a `BIGSERIAL`: strictly increasing but, per the Open Question
//! resolved in SPEC_FULL.md §4.D, not guaranteed gap-free across rolled-back
//! transactions.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::codec::Encoding;
use crate::error::{EventStoreError, SnapshotError};
use crate::event::{Event, EventMetadata, UncommittedEvent};
use crate::snapshot::{self, RetentionPolicy, Snapshot, SnapshotStore};
use crate::streamer::Streamer;
use crate::{AggregateVersion, GlobalPosition};

use super::statements::{
    CURRENT_VERSION_PG, DELETE_CHECKPOINT_PG, INSERT_DEAD_LETTER_PG, INSERT_EVENT_PG, LOAD_ALL_EVENTS_PG,
    LOAD_CHECKPOINT_PG, LOAD_EVENTS_BY_TYPE_PG, LOAD_EVENTS_PG, SAVE_CHECKPOINT_PG, TIP_QUERY,
};
use super::{migrations, BackendConfig};

pub struct PostgresEventStore {
    pool: PgPool,
    streamer: Streamer,
    snapshots: PostgresSnapshotStore,
}

impl PostgresEventStore {
    pub async fn connect(config: BackendConfig, streamer_capacity: usize) -> Result<Self, EventStoreError> {
        let BackendConfig::Postgres { url, application_name, pool_size, pool_timeout, pool_recycle, .. } = config
        else {
            return Err(EventStoreError::InvalidConnectionString(
                "expected a postgres:// connection string".to_string(),
            ));
        };

        let mut connect_options = sqlx::postgres::PgConnectOptions::from_str(&url)
            .map_err(|err| EventStoreError::InvalidConnectionString(err.to_string()))?;
        if let Some(name) = application_name.as_deref() {
            connect_options = connect_options.application_name(name);
        }

        let mut options = PgPoolOptions::new().max_connections(pool_size.unwrap_or(10));
        if let Some(timeout) = pool_timeout {
            options = options.acquire_timeout(Duration::from_secs(timeout));
        }
        if let Some(recycle) = pool_recycle {
            options = options.max_lifetime(Duration::from_secs(recycle));
        }

        let pool = options.connect_with(connect_options).await?;
        let snapshots = PostgresSnapshotStore { pool: pool.clone() };
        Ok(Self { pool, streamer: Streamer::new(streamer_capacity), snapshots })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: PgRow) -> Result<Event, EventStoreError> {
        let payload_encoding: String = row.try_get("payload_encoding")?;
        let payload_encoding = Encoding::from_str(&payload_encoding).map_err(EventStoreError::Codec)?;
        Ok(Event {
            event_id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            aggregate_version: row.try_get("aggregate_version")?,
            global_position: row.try_get("global_position")?,
            timestamp: row.try_get("timestamp")?,
            metadata: EventMetadata {
                causation_id: row.try_get("causation_id")?,
                correlation_id: row.try_get("correlation_id")?,
                user_id: row.try_get("user_id")?,
            },
            payload: row.try_get("payload")?,
            payload_encoding,
        })
    }
}

#[async_trait]
impl super::EventStore for PostgresEventStore {
    async fn run_schema(&self) -> Result<(), EventStoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in migrations::postgres_statements() {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn current_version(&self, aggregate_id: &str) -> Result<Option<AggregateVersion>, EventStoreError> {
        let version: Option<i64> = sqlx::query_scalar(CURRENT_VERSION_PG)
            .bind(aggregate_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    async fn save(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        expected_version: AggregateVersion,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<Event>, EventStoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(CURRENT_VERSION_PG)
            .bind(aggregate_id)
            .fetch_one(&mut *tx)
            .await?;
        let current = current.unwrap_or(0);

        if current != expected_version {
            return Err(EventStoreError::ConcurrencyConflict { expected: expected_version, actual: current });
        }

        let mut committed = Vec::with_capacity(events.len());
        for (index, uncommitted) in events.into_iter().enumerate() {
            let aggregate_version = current + 1 + index as i64;
            let event_id = uncommitted.event_id.unwrap_or_else(Uuid::new_v4);
            let timestamp: DateTime<Utc> = uncommitted.timestamp.unwrap_or_else(Utc::now);

            let global_position: i64 = sqlx::query_scalar(INSERT_EVENT_PG)
                .bind(aggregate_id)
                .bind(aggregate_version)
                .bind(event_id)
                .bind(aggregate_type)
                .bind(&uncommitted.event_type)
                .bind(uncommitted.event_version)
                .bind(timestamp)
                .bind(uncommitted.metadata.causation_id)
                .bind(uncommitted.metadata.correlation_id)
                .bind(&uncommitted.metadata.user_id)
                .bind(&uncommitted.payload)
                .bind(uncommitted.payload_encoding.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|err| match &err {
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                        EventStoreError::ConcurrencyConflict { expected: expected_version, actual: current }
                    }
                    _ => EventStoreError::Backend(err),
                })?;

            committed.push(Event {
                event_id,
                aggregate_id: aggregate_id.to_string(),
                aggregate_type: aggregate_type.to_string(),
                event_type: uncommitted.event_type,
                event_version: uncommitted.event_version,
                aggregate_version,
                global_position,
                timestamp,
                metadata: uncommitted.metadata,
                payload: uncommitted.payload,
                payload_encoding: uncommitted.payload_encoding,
            });
        }

        tx.commit().await?;

        for event in &committed {
            let position = event.stream_position();
            self.streamer.publish_event(event.clone(), position.stream_position, position.global_position);
        }

        Ok(committed)
    }

    fn load_events<'a>(
        &'a self,
        aggregate_id: &'a str,
        from_version: Option<AggregateVersion>,
    ) -> BoxStream<'a, Result<Event, EventStoreError>> {
        Box::pin(
            sqlx::query(LOAD_EVENTS_PG)
                .bind(aggregate_id)
                .bind(from_version.unwrap_or(0))
                .fetch(&self.pool)
                .map(|row| row.map_err(EventStoreError::Backend).and_then(Self::row_to_event)),
        )
    }

    fn load_events_by_type<'a>(
        &'a self,
        aggregate_type: &'a str,
        from_position: Option<GlobalPosition>,
    ) -> BoxStream<'a, Result<Event, EventStoreError>> {
        Box::pin(
            sqlx::query(LOAD_EVENTS_BY_TYPE_PG)
                .bind(aggregate_type)
                .bind(from_position.unwrap_or(0))
                .fetch(&self.pool)
                .map(|row| row.map_err(EventStoreError::Backend).and_then(Self::row_to_event)),
        )
    }

    fn load_all_events<'a>(&'a self, from_position: Option<GlobalPosition>) -> BoxStream<'a, Result<Event, EventStoreError>> {
        Box::pin(
            sqlx::query(LOAD_ALL_EVENTS_PG)
                .bind(from_position.unwrap_or(0))
                .fetch(&self.pool)
                .map(|row| row.map_err(EventStoreError::Backend).and_then(Self::row_to_event)),
        )
    }

    async fn tip(&self) -> Result<Option<GlobalPosition>, EventStoreError> {
        let tip: Option<i64> = sqlx::query_scalar(TIP_QUERY).fetch_one(&self.pool).await?;
        Ok(tip)
    }

    fn streamer(&self) -> &Streamer {
        &self.streamer
    }

    fn snapshots(&self) -> &dyn SnapshotStore {
        &self.snapshots
    }

    async fn load_checkpoint(&self, subscription_id: &str) -> Result<Option<GlobalPosition>, EventStoreError> {
        let position: Option<i64> =
            sqlx::query_scalar(LOAD_CHECKPOINT_PG).bind(subscription_id).fetch_optional(&self.pool).await?;
        Ok(position)
    }

    async fn save_checkpoint(
        &self,
        subscription_id: &str,
        last_global_position: GlobalPosition,
    ) -> Result<(), EventStoreError> {
        sqlx::query(SAVE_CHECKPOINT_PG)
            .bind(subscription_id)
            .bind(last_global_position)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_checkpoint(&self, subscription_id: &str) -> Result<(), EventStoreError> {
        sqlx::query(DELETE_CHECKPOINT_PG).bind(subscription_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_dead_letter(
        &self,
        subscription_id: &str,
        global_position: GlobalPosition,
        event_id: Uuid,
        error: &str,
    ) -> Result<(), EventStoreError> {
        sqlx::query(INSERT_DEAD_LETTER_PG)
            .bind(subscription_id)
            .bind(global_position)
            .bind(event_id)
            .bind(error)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await
    }
}

pub struct PostgresSnapshotStore {
    pool: PgPool,
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn save(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        version: AggregateVersion,
        state: &[u8],
    ) -> Result<(), SnapshotError> {
        let compressed = snapshot::compress(state)?;
        let checksum = snapshot::checksum(state);
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO snapshots (
                aggregate_id, aggregate_type, aggregate_version, state_bytes, checksum,
                created_at, compressed_size, uncompressed_size
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                aggregate_version = EXCLUDED.aggregate_version,
                state_bytes = EXCLUDED.state_bytes,
                checksum = EXCLUDED.checksum,
                created_at = EXCLUDED.created_at,
                compressed_size = EXCLUDED.compressed_size,
                uncompressed_size = EXCLUDED.uncompressed_size
            "#,
        )
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(version)
        .bind(&compressed)
        .bind(&checksum)
        .bind(created_at)
        .bind(compressed.len() as i64)
        .bind(state.len() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let row = sqlx::query(
            "SELECT aggregate_type, aggregate_version, state_bytes, checksum, created_at, \
             compressed_size, uncompressed_size FROM snapshots WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let aggregate_type: String = row.try_get("aggregate_type")?;
        let aggregate_version: AggregateVersion = row.try_get("aggregate_version")?;
        let compressed: Vec<u8> = row.try_get("state_bytes")?;
        let stored_checksum: String = row.try_get("checksum")?;
        let created_at = row.try_get("created_at")?;
        let compressed_size: i64 = row.try_get("compressed_size")?;
        let uncompressed_size: i64 = row.try_get("uncompressed_size")?;

        let state_bytes = snapshot::decompress(&compressed)?;
        if snapshot::checksum(&state_bytes) != stored_checksum {
            return Err(SnapshotError::ChecksumMismatch {
                aggregate_id: aggregate_id.to_string(),
                version: aggregate_version,
            });
        }

        Ok(Some(Snapshot {
            aggregate_id: aggregate_id.to_string(),
            aggregate_type,
            aggregate_version,
            state_bytes,
            checksum: stored_checksum,
            created_at,
            compressed_size,
            uncompressed_size,
        }))
    }

    async fn cleanup(&self, policy: RetentionPolicy) -> Result<(), SnapshotError> {
        match policy {
            RetentionPolicy::KeepLatest(n) => {
                sqlx::query(
                    "DELETE FROM snapshots WHERE aggregate_id NOT IN \
                     (SELECT aggregate_id FROM snapshots ORDER BY created_at DESC LIMIT $1)",
                )
                .bind(n as i64)
                .execute(&self.pool)
                .await?;
            }
            RetentionPolicy::KeepNewerThan(age) => {
                let cutoff = Utc::now() - age;
                sqlx::query("DELETE FROM snapshots WHERE created_at < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}
