//! Cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::request::{HttpResponse, RequestKey};

/// One cached request→response snapshot.
///
/// Immutable once stored; a new write for the same key within the same
/// generation fully replaces the prior entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: RequestKey,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a response under the given key, stamped now.
  pub fn from_response(key: RequestKey, response: &HttpResponse) -> Self {
    Self {
      key,
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  /// Rehydrate the stored response.
  pub fn into_response(self) -> HttpResponse {
    HttpResponse {
      status: self.status,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// Trait for generation-scoped cache storage backends.
///
/// A lookup against a generation that does not exist is a miss, never an
/// error. Writes are last-write-wins per key; no multi-key transactions
/// beyond the atomic batch used for precaching.
pub trait CacheStore: Send + Sync {
  /// Look up an entry within a generation.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Store an entry within a generation, replacing any prior entry for the
  /// same key.
  fn put(&self, generation: &str, entry: &CacheEntry) -> Result<()>;

  /// Store a batch atomically: either every entry lands or none do.
  fn put_all(&self, generation: &str, entries: &[CacheEntry]) -> Result<()>;

  /// Delete a generation and everything in it.
  fn delete_generation(&self, name: &str) -> Result<()>;

  /// Names of all generations currently holding entries.
  fn list_generation_names(&self) -> Result<BTreeSet<String>>;
}

/// SQLite-backed cache store. Survives agent restarts; an explicit
/// generation deletion is the only way entries go away.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory store (used by tests).
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offsync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
-- Request→response snapshots, scoped to a named generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);
"#;

impl CacheStore for SqliteStore {
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers_json, body, stored_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        let stored_at = parse_datetime(&stored_at_str)?;

        Ok(Some(CacheEntry {
          key: key.clone(),
          status,
          headers,
          body,
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    insert_entry(&conn, generation, entry)
  }

  fn put_all(&self, generation: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // One transaction so a partial batch never becomes visible
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for entry in entries {
      insert_entry(&tx, generation, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit cache batch: {}", e))?;

    Ok(())
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    Ok(())
  }

  fn list_generation_names(&self) -> Result<BTreeSet<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM cache_entries")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let names: BTreeSet<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }
}

fn insert_entry(conn: &Connection, generation: &str, entry: &CacheEntry) -> Result<()> {
  let headers_json = serde_json::to_string(&entry.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
  let stored_at = entry.stored_at.format("%Y-%m-%d %H:%M:%S").to_string();

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (generation, request_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        generation,
        entry.key.as_str(),
        entry.status,
        headers_json,
        entry.body,
        stored_at
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
