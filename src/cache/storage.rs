//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::types::CacheEntry;

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores (generations), each mapping a
/// request key to one entry.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, store: &str) -> Result<()>;

  /// Get the entry for a request key.
  fn get(&self, store: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any previous entry for the same key.
  fn put(&self, store: &str, entry: &CacheEntry) -> Result<()>;

  /// Store several entries atomically: either all are written or none.
  fn put_all(&self, store: &str, entries: &[CacheEntry]) -> Result<()>;

  /// Delete the entry for a key. Returns whether one existed.
  fn delete(&self, store: &str, key: &str) -> Result<bool>;

  /// List request keys in a store, in insertion order.
  fn keys(&self, store: &str) -> Result<Vec<String>>;

  /// List store names, oldest first.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and everything in it. Returns whether it existed.
  fn delete_store(&self, store: &str) -> Result<bool>;
}

/// A store opened by name on a shared backend.
pub struct CacheHandle<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> CacheHandle<S> {
  /// Refer to a store without touching the backend. The store is created on
  /// first write.
  pub fn new(storage: Arc<S>, name: impl Into<String>) -> Self {
    Self {
      storage,
      name: name.into(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    self.storage.get(&self.name, key)
  }

  pub fn put(&self, entry: &CacheEntry) -> Result<()> {
    self.storage.put(&self.name, entry)
  }

  pub fn put_all(&self, entries: &[CacheEntry]) -> Result<()> {
    self.storage.put_all(&self.name, entries)
  }

  pub fn delete(&self, key: &str) -> Result<bool> {
    self.storage.delete(&self.name, key)
  }

  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.keys(&self.name)
  }
}

impl<S: CacheStorage> Clone for CacheHandle<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
    }
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named stores (one per generation)
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses; headers are a JSON object, stored_at is epoch millis
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    payload BLOB NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (store_name, request_key)
);
"#;

const INSERT_STORE: &str = "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)";

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO cache_entries (store_name, request_key, payload, status, status_text, headers, stored_at)
   VALUES (?, ?, ?, ?, ?, ?, ?)";

fn write_entry(conn: &Connection, store: &str, entry: &CacheEntry) -> Result<()> {
  let headers = serde_json::to_string(&entry.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      UPSERT_ENTRY,
      params![
        store,
        entry.request_key,
        entry.payload.as_ref(),
        entry.status,
        entry.status_text,
        headers,
        entry.stored_at.timestamp_millis(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", entry.request_key, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open(&self, store: &str) -> Result<()> {
    self
      .conn()?
      .execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;

    Ok(())
  }

  fn get(&self, store: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT payload, status, status_text, headers, stored_at FROM cache_entries
         WHERE store_name = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(Vec<u8>, u16, String, String, i64)> = stmt
      .query_row(params![store, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    let Some((payload, status, status_text, headers, stored_at)) = row else {
      return Ok(None);
    };

    let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
    let stored_at = DateTime::<Utc>::from_timestamp_millis(stored_at)
      .ok_or_else(|| eyre!("Invalid stored_at {} for {}", stored_at, key))?;

    Ok(Some(CacheEntry {
      request_key: key.to_string(),
      payload: payload.into(),
      status,
      status_text,
      headers,
      stored_at,
    }))
  }

  fn put(&self, store: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;
    write_entry(&tx, store, entry)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, store: &str, entries: &[CacheEntry]) -> Result<()> {
    let conn = self.conn()?;
    // Rolled back on drop unless committed
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_STORE, params![store])
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;
    for entry in entries {
      write_entry(&tx, store, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, store: &str, key: &str) -> Result<bool> {
    let deleted = self
      .conn()?
      .execute(
        "DELETE FROM cache_entries WHERE store_name = ? AND request_key = ?",
        params![store, key],
      )
      .map_err(|e| eyre!("Failed to delete entry {}: {}", key, e))?;

    Ok(deleted > 0)
  }

  fn keys(&self, store: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE store_name = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map(params![store], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", store, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key of {}: {}", store, e))?;

    Ok(keys)
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare store query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![store],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let deleted = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }
}
