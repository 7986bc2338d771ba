use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::adapters::db::{self, DbError};
use crate::domain::clock::{Clock, SystemClock};

pub const PREFERENCES_KEY: &str = "preferences";
pub const PREDICTION_CACHE_KEY: &str = "prediction_cache";
pub const PREDICTOR_MODEL_KEY: &str = "predictor_model";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("store operation failed: {0}")]
    Database(#[from] DbError),
    #[error("stored value for {key} is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable string-keyed store for the few records that outlive a restart.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    /// Opens `path` and brings the schema up to date.
    pub fn open(path: &str) -> Result<Self, DbError> {
        let mut connection = db::open_connection(path)?;
        db::run_migrations(&mut connection)?;
        Ok(Self::new(Arc::new(Mutex::new(connection))))
    }

    pub fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_connection(db::schema_version)
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_connection(db::list_keys)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, StoreError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        op(&connection).map_err(StoreError::from)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_connection(|connection| db::get_value(connection, key))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let updated_at = SystemClock.now().to_iso8601();
        self.with_connection(|connection| db::put_value(connection, key, value, &updated_at))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with_connection(|connection| db::delete_value(connection, key))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(values.remove(key).is_some())
    }
}

pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })
}

pub fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.put(key, &raw)
}
