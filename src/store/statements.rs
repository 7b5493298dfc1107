//! Parameterized SQL shared by the backend adapters. Placeholder style (`$1` vs `?`)
//! is the only thing that differs between Postgres and SQLite, so each backend module
//! owns its own copy of the handful of statements below (mirroring the teacher's
//! `sql/statements.rs`, minus its per-aggregate table templating — this schema uses one
//! shared `events` table for every aggregate type).

pub(crate) const INSERT_EVENT_PG: &str = r#"
    INSERT INTO events (
        aggregate_id, aggregate_version, event_id, aggregate_type, event_type,
        event_version, "timestamp", causation_id, correlation_id, user_id,
        payload, payload_encoding
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    RETURNING global_position
"#;

pub(crate) const INSERT_EVENT_SQLITE: &str = r#"
    INSERT INTO events (
        aggregate_id, aggregate_version, event_id, aggregate_type, event_type,
        event_version, "timestamp", causation_id, correlation_id, user_id,
        payload, payload_encoding
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

pub(crate) const LOAD_EVENTS_PG: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
    aggregate_version, global_position, "timestamp", causation_id, correlation_id,
    user_id, payload, payload_encoding
     FROM events WHERE aggregate_id = $1 AND aggregate_version > $2 ORDER BY aggregate_version ASC
"#;
pub(crate) const LOAD_EVENTS_SQLITE: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
    aggregate_version, global_position, "timestamp", causation_id, correlation_id,
    user_id, payload, payload_encoding
     FROM events WHERE aggregate_id = ? AND aggregate_version > ? ORDER BY aggregate_version ASC
"#;

pub(crate) const LOAD_EVENTS_BY_TYPE_PG: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
    aggregate_version, global_position, "timestamp", causation_id, correlation_id,
    user_id, payload, payload_encoding
     FROM events WHERE aggregate_type = $1 AND global_position > $2 ORDER BY global_position ASC
"#;
pub(crate) const LOAD_EVENTS_BY_TYPE_SQLITE: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
    aggregate_version, global_position, "timestamp", causation_id, correlation_id,
    user_id, payload, payload_encoding
     FROM events WHERE aggregate_type = ? AND global_position > ? ORDER BY global_position ASC
"#;

pub(crate) const LOAD_ALL_EVENTS_PG: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
    aggregate_version, global_position, "timestamp", causation_id, correlation_id,
    user_id, payload, payload_encoding
     FROM events WHERE global_position > $1 ORDER BY global_position ASC
"#;
pub(crate) const LOAD_ALL_EVENTS_SQLITE: &str = r#"
    SELECT event_id, aggregate_id, aggregate_type, event_type, event_version,
    aggregate_version, global_position, "timestamp", causation_id, correlation_id,
    user_id, payload, payload_encoding
     FROM events WHERE global_position > ? ORDER BY global_position ASC
"#;

pub(crate) const CURRENT_VERSION_PG: &str =
    "SELECT MAX(aggregate_version) FROM events WHERE aggregate_id = $1";
pub(crate) const CURRENT_VERSION_SQLITE: &str =
    "SELECT MAX(aggregate_version) FROM events WHERE aggregate_id = ?";

pub(crate) const TIP_QUERY: &str = "SELECT MAX(global_position) FROM events";

pub(crate) const LOAD_CHECKPOINT_PG: &str = "SELECT last_global_position FROM checkpoints WHERE subscription_id = $1";
pub(crate) const LOAD_CHECKPOINT_SQLITE: &str = "SELECT last_global_position FROM checkpoints WHERE subscription_id = ?";

pub(crate) const SAVE_CHECKPOINT_PG: &str = r#"
    INSERT INTO checkpoints (subscription_id, last_global_position, updated_at) VALUES ($1, $2, $3)
    ON CONFLICT (subscription_id) DO UPDATE SET
        last_global_position = EXCLUDED.last_global_position, updated_at = EXCLUDED.updated_at
"#;
pub(crate) const SAVE_CHECKPOINT_SQLITE: &str = r#"
    INSERT INTO checkpoints (subscription_id, last_global_position, updated_at) VALUES (?, ?, ?)
    ON CONFLICT (subscription_id) DO UPDATE SET
        last_global_position = excluded.last_global_position, updated_at = excluded.updated_at
"#;

pub(crate) const DELETE_CHECKPOINT_PG: &str = "DELETE FROM checkpoints WHERE subscription_id = $1";
pub(crate) const DELETE_CHECKPOINT_SQLITE: &str = "DELETE FROM checkpoints WHERE subscription_id = ?";

pub(crate) const INSERT_DEAD_LETTER_PG: &str = r#"
    INSERT INTO dead_letters (subscription_id, global_position, event_id, error, recorded_at)
    VALUES ($1, $2, $3, $4, $5)
"#;
pub(crate) const INSERT_DEAD_LETTER_SQLITE: &str = r#"
    INSERT INTO dead_letters (subscription_id, global_position, event_id, error, recorded_at)
    VALUES (?, ?, ?, ?, ?)
"#;
