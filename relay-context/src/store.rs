//! Durable key-value storage for conversation histories and settings.
//!
//! The context manager only needs whole-value get/set/contains/delete per
//! conversation id. [`SqliteStore`] persists values as JSON rows keyed by
//! `(namespace, key)`; [`MemoryStore`] is the in-process stand-in.

use crate::types::{ConversationConfig, History};
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Whole-value storage keyed by conversation id.
#[async_trait]
pub trait Store<V: Send + Sync>: Send + Sync {
    /// Backend name (e.g., "sqlite", "memory")
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Replace the value for `key`. Visible to the next `get` once this returns.
    async fn set(&self, key: &str, value: &V) -> Result<()>;

    async fn contains(&self, key: &str) -> Result<bool>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Health check, true if the backend is operational.
    async fn health_check(&self) -> bool;
}

/// Conversation id → committed history.
pub type SessionStore = dyn Store<History>;

/// Conversation id → prompt, temperature and model overrides.
pub type ConfigStore = dyn Store<ConversationConfig>;

/// Namespace for histories in a shared database file.
pub const SESSIONS: &str = "sessions";

/// Namespace for conversation settings in a shared database file.
pub const CONFIGS: &str = "configs";

// ============================================================================
// SQLite
// ============================================================================

/// `SQLite` store holding JSON-encoded values of one namespace.
///
/// Every statement runs on the blocking pool; async callers never wait on
/// disk I/O from a runtime worker.
pub struct SqliteStore<V> {
    conn: Arc<Mutex<Connection>>,
    namespace: Arc<str>,
    _value: PhantomData<fn() -> V>,
}

impl<V> SqliteStore<V> {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: &Path, namespace: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            namespace: Arc::from(namespace),
            _value: PhantomData,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS kv (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                updated_at  INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(())
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let namespace = Arc::clone(&self.namespace);

        tokio::task::spawn_blocking(move || -> Result<T> {
            let conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {e}"))?;
            op(&conn, &namespace)
        })
        .await?
    }
}

#[async_trait]
impl<V> Store<V> for SqliteStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<V>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn, namespace| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                        params![namespace, key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &V) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let key = key.to_string();
        let now = chrono::Utc::now().timestamp();

        self.with_conn(move |conn, namespace| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (namespace, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![namespace, key, json, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn, namespace| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn, namespace| {
            let affected = conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            Ok(affected > 0)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn, _| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .await
            .is_ok()
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile store for tests and throwaway sessions.
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> Store<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &V) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
