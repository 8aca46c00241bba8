//! Storage layer for the web time tracker.
//!
//! Implements the [`Store`] persistence port on top of `rusqlite`.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! [`SharedDatabase`] serializes access through a `Mutex` so that one
//! connection can back the engine, the token manager and the heartbeat task.
//!
//! # Schema
//!
//! A single `records` table maps a key (e.g. `settings`,
//! `daily_stats:2025-01-15`) to a JSON document. `updated_at` is stored as
//! RFC 3339 TEXT in UTC, so lexicographic order matches chronological order.
//!
//! Adding fields to a record is backward compatible as long as the reader
//! uses `#[serde(default)]`; renames require a migration.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use wt_core::{Store, StoreError};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored value is not valid JSON.
    #[error("invalid JSON in record {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// The database directory could not be created.
    #[error("failed to create database directory: {0}")]
    CreateDir(#[source] std::io::Error),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it and its parent
    /// directory if necessary.
    ///
    /// The schema is initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Reads the record stored under `key`.
    pub fn get_record(&self, key: &str) -> Result<Option<Value>, DbError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM records WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|source| DbError::Json {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    /// Inserts or replaces the record under `key`.
    pub fn put_record(&self, key: &str, value: &Value) -> Result<(), DbError> {
        let raw = serde_json::to_string(value).map_err(|source| DbError::Json {
            key: key.to_string(),
            source,
        })?;
        let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        self.conn.execute(
            "
            INSERT INTO records (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, raw, updated_at],
        )?;
        Ok(())
    }

    /// Deletes the record under `key`. Returns whether a record existed.
    pub fn delete_record(&self, key: &str) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM records WHERE key = ?", params![key])?;
        Ok(deleted > 0)
    }

    /// Lists keys starting with `prefix`, in ascending order.
    pub fn list_keys(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM records WHERE substr(key, 1, ?) = ? ORDER BY key ASC")?;
        let rows = stmt.query_map(params![prefix.chars().count(), prefix], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

/// A [`Database`] shared behind a mutex, usable as a [`Store`].
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Runs `f` with exclusive access to the database.
    pub fn with<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let db = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }
}

impl Store for SharedDatabase {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.with(|db| db.get_record(key))
            .map_err(StoreError::backend)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.with(|db| db.put_record(key, &value))
            .map_err(StoreError::backend)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with(|db| db.delete_record(key))
            .map(|_| ())
            .map_err(StoreError::backend)
    }
}
