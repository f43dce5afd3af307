use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

pub const ATTRIBUTION_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Persisted attribution state for this install. Exactly two facts
/// survive restarts: when the install happened, and whether the install
/// postback has been confirmed sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributionState {
    pub install_ts: DateTime<Utc>,
    pub install_postback_sent: bool,
}

pub struct AttributionStore {
    conn: Connection,
}

impl AttributionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > ATTRIBUTION_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: ATTRIBUTION_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_attribution_state.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Creates the install record if none exists; the stored timestamp
    /// is immutable, so a second call returns the original record and
    /// ignores `now`.
    pub fn init_install(&self, now: DateTime<Utc>) -> Result<AttributionState, StorageError> {
        self.conn.execute(
            "
            INSERT OR IGNORE INTO attribution_state (id, install_ts, install_postback_sent)
            VALUES (1, ?1, 0)
            ",
            params![now.to_rfc3339()],
        )?;

        let state = self.conn.query_row(
            "SELECT install_ts, install_postback_sent FROM attribution_state WHERE id = 1",
            [],
            map_state_row,
        )?;
        Ok(state)
    }

    pub fn load(&self) -> Result<Option<AttributionState>, StorageError> {
        let state = self
            .conn
            .query_row(
                "SELECT install_ts, install_postback_sent FROM attribution_state WHERE id = 1",
                [],
                map_state_row,
            )
            .optional()?;
        Ok(state)
    }

    /// Flips the postback flag to sent. Only called after a confirmed
    /// successful send; never flips back.
    pub fn mark_install_reported(&self) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE attribution_state SET install_postback_sent = 1 WHERE id = 1",
            [],
        )?;
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }
}

fn map_state_row(row: &rusqlite::Row<'_>) -> Result<AttributionState, rusqlite::Error> {
    let install_ts = parse_timestamp(row.get::<_, String>(0)?).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(AttributionState {
        install_ts,
        install_postback_sent: row.get::<_, i64>(1)? != 0,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
