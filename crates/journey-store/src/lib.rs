//! Storage layer for journey sessions.
//!
//! The session controller keeps exactly one record: the tail of the most
//! recent session. [`SqliteStore`] persists it in a small key-value table so
//! the next process run can report it; [`MemoryStore`] keeps it for the
//! lifetime of the value only.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so [`SqliteStore`] wraps
//! it in a mutex and runs every statement on the blocking thread pool.
//!
//! # Schema
//!
//! Values are stored as JSON text under a string key. `updated_at` is an
//! ISO 8601 UTC timestamp (e.g. `2024-01-15T10:30:00.000Z`).

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use journey_core::{Clock, IdGenerator, SessionStore, SessionTail, StoreError, decode_tail};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

/// Key the session tail is stored under.
pub const SESSION_KEY: &str = "journey3.net/session";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The blocking task running a statement panicked or was cancelled.
    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Session store backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens a database at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory database.
    ///
    /// The stored session is lost when the store is dropped.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Reads the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        get(&self.lock(), key)
    }

    /// Replaces the raw value stored under `key`.
    pub fn put(&self, key: &str, value: &str) -> Result<(), DbError> {
        put(&self.lock(), key, value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DbError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&conn)
        })
        .await?
    }
}

/// Initializes the schema. Idempotent.
fn init(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn get(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
        .optional()?;
    Ok(value)
}

fn put(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    conn.execute(
        "
        INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        ",
        params![key, value, now],
    )?;
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_last_session(
        &self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
    ) -> Result<Option<SessionTail>, StoreError> {
        let raw = self
            .run(|conn| get(conn, SESSION_KEY))
            .await
            .map_err(StoreError::backend)?;
        let Some(raw) = raw else {
            debug!("no previous session stored");
            return Ok(None);
        };
        Ok(Some(decode_tail(&raw, clock, ids)?))
    }

    async fn save_session(&self, tail: &SessionTail) -> Result<(), StoreError> {
        let json = serde_json::to_string(tail)?;
        self.run(move |conn| put(conn, SESSION_KEY, &json))
            .await
            .map_err(StoreError::backend)
    }
}

/// Session store that lives only as long as the value.
///
/// Keeps the serialized form, so loads go through the same tolerant decoding
/// as [`SqliteStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `json` as the last session.
    pub fn from_json(json: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(json.into())),
        }
    }

    /// Returns the stored JSON, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_last_session(
        &self,
        clock: &dyn Clock,
        ids: &dyn IdGenerator,
    ) -> Result<Option<SessionTail>, StoreError> {
        self.raw()
            .map(|raw| decode_tail(&raw, clock, ids))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save_session(&self, tail: &SessionTail) -> Result<(), StoreError> {
        let json = serde_json::to_string(tail)?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }
}
