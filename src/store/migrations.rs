//! Backend-neutral schema (spec.md §4.B "Schema", §6 "Persistent schema").
//!
//! Each backend runs its own dialect of the same four tables
//! (`events`, `snapshots`, `checkpoints`, `dead_letters`) plus a `schema_version`
//! table, inside one transaction, idempotently (`CREATE TABLE IF NOT EXISTS`).

/// Bumped whenever the DDL below changes in a way existing databases must migrate
/// through; compared against the `schema_version` row by [`crate::ops::migrate`].
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

pub(crate) fn postgres_statements() -> Vec<&'static str> {
    vec![
        r#"CREATE TABLE IF NOT EXISTS events (
            aggregate_id VARCHAR NOT NULL,
            aggregate_version BIGINT NOT NULL,
            event_id UUID NOT NULL,
            aggregate_type VARCHAR NOT NULL,
            event_type VARCHAR NOT NULL,
            event_version INTEGER NOT NULL,
            "timestamp" TIMESTAMPTZ NOT NULL,
            causation_id UUID,
            correlation_id UUID,
            user_id VARCHAR,
            payload BYTEA NOT NULL,
            payload_encoding VARCHAR NOT NULL,
            global_position BIGSERIAL,
            PRIMARY KEY (aggregate_id, aggregate_version)
        )"#,
        r#"CREATE UNIQUE INDEX IF NOT EXISTS events_global_position_idx ON events (global_position)"#,
        r#"CREATE INDEX IF NOT EXISTS events_aggregate_type_global_position_idx ON events (aggregate_type, global_position)"#,
        r#"CREATE INDEX IF NOT EXISTS events_timestamp_idx ON events ("timestamp")"#,
        r#"CREATE TABLE IF NOT EXISTS snapshots (
            aggregate_id VARCHAR PRIMARY KEY,
            aggregate_type VARCHAR NOT NULL,
            aggregate_version BIGINT NOT NULL,
            state_bytes BYTEA NOT NULL,
            checksum VARCHAR NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            compressed_size BIGINT NOT NULL,
            uncompressed_size BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS checkpoints (
            subscription_id VARCHAR PRIMARY KEY,
            last_global_position BIGINT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS dead_letters (
            id BIGSERIAL PRIMARY KEY,
            subscription_id VARCHAR NOT NULL,
            global_position BIGINT NOT NULL,
            event_id UUID NOT NULL,
            error VARCHAR NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS schema_version (
            id SMALLINT PRIMARY KEY DEFAULT 1,
            version BIGINT NOT NULL,
            CONSTRAINT schema_version_singleton CHECK (id = 1)
        )"#,
        r#"INSERT INTO schema_version (id, version) VALUES (1, 1)
           ON CONFLICT (id) DO NOTHING"#,
    ]
}

pub(crate) fn sqlite_statements() -> Vec<&'static str> {
    vec![
        r#"CREATE TABLE IF NOT EXISTS events (
            aggregate_id TEXT NOT NULL,
            aggregate_version INTEGER NOT NULL,
            event_id TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            event_type TEXT NOT NULL,
            event_version INTEGER NOT NULL,
            "timestamp" TEXT NOT NULL,
            causation_id TEXT,
            correlation_id TEXT,
            user_id TEXT,
            payload BLOB NOT NULL,
            payload_encoding TEXT NOT NULL,
            global_position INTEGER PRIMARY KEY AUTOINCREMENT,
            UNIQUE (aggregate_id, aggregate_version)
        )"#,
        r#"CREATE INDEX IF NOT EXISTS events_aggregate_type_global_position_idx ON events (aggregate_type, global_position)"#,
        r#"CREATE INDEX IF NOT EXISTS events_timestamp_idx ON events ("timestamp")"#,
        r#"CREATE TABLE IF NOT EXISTS snapshots (
            aggregate_id TEXT PRIMARY KEY,
            aggregate_type TEXT NOT NULL,
            aggregate_version INTEGER NOT NULL,
            state_bytes BLOB NOT NULL,
            checksum TEXT NOT NULL,
            created_at TEXT NOT NULL,
            compressed_size INTEGER NOT NULL,
            uncompressed_size INTEGER NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS checkpoints (
            subscription_id TEXT PRIMARY KEY,
            last_global_position INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subscription_id TEXT NOT NULL,
            global_position INTEGER NOT NULL,
            event_id TEXT NOT NULL,
            error TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        )"#,
        r#"INSERT OR IGNORE INTO schema_version (id, version) VALUES (1, 1)"#,
    ]
}
