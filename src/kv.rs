//! Durable key-value storage for location state.
//!
//! Values are JSON strings under fixed keys (see [`keys`]). The SQLite
//! backend keeps one `kv` table and runs every statement on the blocking
//! pool so callers only see an async suspension point. [`WriteBehind`]
//! serialises fire-and-forget writes so that the last call wins on disk as
//! it does in memory.

use crate::error::PersistenceError;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Keys owned by the location store. Nothing else writes them.
pub mod keys {
    pub const LAST_LOCATION: &str = "last_location";
    pub const MANUAL_LOCATION: &str = "manual_location";
    pub const CITIES_CACHE: &str = "cities_cache";
    pub const CITIES_CACHE_TIMESTAMP: &str = "cities_cache_timestamp";
    pub const GPS_PERMISSION: &str = "gps_permission";
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError>;
    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Reads `key` and decodes it as JSON. A missing key is `Ok(None)`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| PersistenceError::Json {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub fn encode_json<T: Serialize>(key: &str, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string(value).map_err(|source| PersistenceError::Json {
        key: key.to_string(),
        source,
    })
}

pub async fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let raw = encode_json(key, value)?;
    store.set(key, raw).await
}

/// SQLite-backed store. One connection, guarded by a mutex.
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await?;
        Ok(result?)
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let key = key.to_string();
        self.call(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let key = key.to_string();
        let now = chrono::Utc::now().timestamp_millis();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let key = key.to_string();
        self.call(move |conn| conn.execute("DELETE FROM kv WHERE key = ?1", [&key]).map(|_| ()))
            .await
    }
}

/// Process-local store, used by tests and when no database path is usable.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

enum WriteOp {
    Put { key: &'static str, value: String },
    Delete { key: &'static str },
    Flush(oneshot::Sender<()>),
}

/// Ordered fire-and-forget writer in front of a [`KeyValueStore`].
///
/// Must be created inside a tokio runtime. Failed writes are logged and
/// dropped; the caller's in-memory value stays authoritative.
pub struct WriteBehind {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl WriteBehind {
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Put { key, value } => {
                        if let Err(e) = store.set(key, value).await {
                            warn!("Persistence failure writing '{}': {}", key, e);
                        } else {
                            debug!("Persisted '{}'", key);
                        }
                    }
                    WriteOp::Delete { key } => {
                        if let Err(e) = store.remove(key).await {
                            warn!("Persistence failure removing '{}': {}", key, e);
                        } else {
                            debug!("Removed '{}'", key);
                        }
                    }
                    WriteOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Write-behind queue closed");
        });

        Self { tx }
    }

    pub fn put(&self, key: &'static str, value: String) {
        if self.tx.send(WriteOp::Put { key, value }).is_err() {
            warn!("Write-behind queue closed; dropping write to '{}'", key);
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &'static str, value: &T) {
        match encode_json(key, value) {
            Ok(raw) => self.put(key, raw),
            Err(e) => warn!("Persistence failure encoding '{}': {}", key, e),
        }
    }

    pub fn delete(&self, key: &'static str) {
        if self.tx.send(WriteOp::Delete { key }).is_err() {
            warn!("Write-behind queue closed; dropping delete of '{}'", key);
        }
    }

    /// Resolves once every write queued before this call has been applied.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteOp::Flush(done_tx))
            .map_err(|_| PersistenceError::Closed)?;
        done_rx.await.map_err(|_| PersistenceError::Closed)
    }
}
