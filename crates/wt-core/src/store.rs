//! Persistence port.
//!
//! The engine only needs get/set/remove on named JSON records. Backends
//! implement [`Store`]; `wt-db` provides the SQLite one and [`MemoryStore`]
//! serves tests and degraded (non-durable) operation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Record keys.
pub mod keys {
    use chrono::NaiveDate;

    pub const SETTINGS: &str = "settings";
    pub const TRACKER_STATE: &str = "tracker_state";
    pub const AUTH: &str = "auth";
    pub const ACTIVITY_BUFFER: &str = "activity_buffer";

    /// Prefix shared by all daily statistics records.
    pub const DAILY_STATS_PREFIX: &str = "daily_stats:";

    /// Key of the daily statistics record for `date`.
    pub fn daily_stats(date: NaiveDate) -> String {
        format!("{DAILY_STATS_PREFIX}{}", date.format("%Y-%m-%d"))
    }
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend failed to read or write.
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A record could not be encoded or decoded.
    #[error("invalid record {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Wraps any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Key/value persistence of JSON records.
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes a record. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Loads and decodes the record under `key`.
pub fn load<T, S>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: Store + ?Sized,
{
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })
}

/// Loads a record, falling back to the default when it is missing or the
/// store fails. Failures are logged; tracking continues on the default.
pub fn load_or_default<T, S>(store: &S, key: &str) -> T
where
    T: DeserializeOwned + Default,
    S: Store + ?Sized,
{
    match load(store, key) {
        Ok(value) => value.unwrap_or_default(),
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to load record, using defaults");
            T::default()
        }
    }
}

/// Encodes and stores `value` under `key`.
pub fn save<T, S>(store: &S, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
    S: Store + ?Sized,
{
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, value)
}

/// Persisted pause state and session start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerState {
    pub is_paused: bool,
    pub session_start_time: Option<DateTime<Utc>>,
}

/// In-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = records.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(key);
        Ok(())
    }
}

/// Parses the date out of a daily statistics key.
pub fn daily_stats_date(key: &str) -> Option<NaiveDate> {
    let date = key.strip_prefix(keys::DAILY_STATS_PREFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_none() {
        let store = MemoryStore::new();
        let state: Option<TrackerState> = load(&store, keys::TRACKER_STATE).unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn save_then_load() {
        let store = MemoryStore::new();
        let state = TrackerState {
            is_paused: true,
            session_start_time: DateTime::from_timestamp(1_700_000_000, 0),
        };
        save(&store, keys::TRACKER_STATE, &state).unwrap();
        let loaded: TrackerState = load(&store, keys::TRACKER_STATE).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(store.keys(), vec![keys::TRACKER_STATE.to_string()]);
    }

    #[test]
    fn tracker_state_wire_names() {
        let value = serde_json::to_value(TrackerState::default()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"isPaused": false, "sessionStartTime": null})
        );
    }

    #[test]
    fn corrupt_record_reports_key() {
        let store = MemoryStore::new();
        store
            .set(keys::TRACKER_STATE, serde_json::json!({"isPaused": "yes"}))
            .unwrap();
        let err = load::<TrackerState, _>(&store, keys::TRACKER_STATE).unwrap_err();
        assert!(err.to_string().contains("tracker_state"));
        let fallback: TrackerState = load_or_default(&store, keys::TRACKER_STATE);
        assert!(!fallback.is_paused);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = MemoryStore::new();
        store.remove("missing").unwrap();
        store.set("k", Value::Bool(true)).unwrap();
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn daily_stats_key_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let key = keys::daily_stats(date);
        assert_eq!(key, "daily_stats:2025-03-09");
        assert_eq!(daily_stats_date(&key), Some(date));
        assert_eq!(daily_stats_date("settings"), None);
    }
}
