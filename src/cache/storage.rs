//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CachedResponse, Request, Response};

/// Trait for cache storage backends.
///
/// Mirrors the host's cache storage: named generations holding
/// request → response entries. Every method is atomic on its own.
#[allow(async_fn_in_trait)]
pub trait CacheStorage: Send + Sync {
  /// Open the generation named `tag`, creating it if absent.
  async fn open(&self, tag: &str) -> Result<()>;

  /// Store all entries into an open generation, all or nothing.
  async fn put_all(&self, tag: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look a request up across all generations, oldest generation first.
  async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>>;

  /// All generation tags, in creation order.
  async fn keys(&self) -> Result<Vec<String>>;

  /// Delete a generation and every entry in it. Returns false if it did not exist.
  async fn delete(&self, tag: &str) -> Result<bool>;

  /// Number of entries stored in a generation.
  async fn entry_count(&self, tag: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the storage database at `path`.
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

  /// Storage that lives only as long as this value.
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

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("ecolook-sw").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// Look a request up in a single generation.
  #[cfg(test)]
  pub async fn match_in(&self, tag: &str, request: &Request) -> Result<Option<CachedResponse>> {
    self.lookup(Some(tag), request)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn lookup(
    &self,
    tag: Option<&str>,
    request: &Request,
  ) -> Result<Option<CachedResponse>> {
    if !request.is_cacheable() {
      return Ok(None);
    }

    let conn = self.lock()?;
    let key = request_key(request);

    let row: Option<StoredRow> = conn
      .query_row(
        "SELECT g.tag, e.url, e.status, e.status_text, e.headers, e.body, e.cached_at
         FROM entries e
         INNER JOIN generations g ON g.id = e.generation_id
         WHERE e.request_key = ?1 AND (?2 IS NULL OR g.tag = ?2)
         ORDER BY g.id
         LIMIT 1",
        params![key, tag],
        |row| {
          Ok(StoredRow {
            generation: row.get(0)?,
            url: row.get(1)?,
            status: row.get(2)?,
            status_text: row.get(3)?,
            headers: row.get(4)?,
            body: row.get(5)?,
            cached_at: row.get(6)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {}: {}", request.url, e))?;

    row.map(StoredRow::into_cached).transpose()
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation; id order is creation order
CREATE TABLE IF NOT EXISTS generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored response snapshots keyed by request
CREATE TABLE IF NOT EXISTS entries (
    generation_id INTEGER NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    request_url TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation_id, request_key),
    FOREIGN KEY (generation_id) REFERENCES generations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_request_key ON entries(request_key);
"#;

/// Raw entry row before header decoding.
struct StoredRow {
  generation: String,
  url: String,
  status: u16,
  status_text: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl StoredRow {
  fn into_cached(self) -> Result<CachedResponse> {
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize stored headers: {}", e))?;

    Ok(CachedResponse {
      generation: self.generation,
      response: Response {
        url: self.url,
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

impl CacheStorage for SqliteStorage {
  async fn open(&self, tag: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO generations (tag) VALUES (?)",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to open cache generation {}: {}", tag, e))?;

    Ok(())
  }

  async fn put_all(&self, tag: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let generation_id: i64 = tx
      .query_row(
        "SELECT id FROM generations WHERE tag = ?",
        params![tag],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache generation {}: {}", tag, e))?
      .ok_or_else(|| eyre!("Cache generation {} is not open", tag))?;

    for (request, response) in entries {
      if !request.is_cacheable() {
        return Err(eyre!(
          "Refusing to cache {} request for {}",
          request.method,
          request.url
        ));
      }

      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entries
           (generation_id, request_key, method, request_url, url, status, status_text, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          generation_id,
          request_key(request),
          request.method,
          request.cache_url(),
          response.url,
          response.status,
          response.status_text,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", request.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn match_request(&self, request: &Request) -> Result<Option<CachedResponse>> {
    self.lookup(None, request)
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT tag FROM generations ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(tags)
  }

  async fn delete(&self, tag: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let generation_id: Option<i64> = tx
      .query_row(
        "SELECT id FROM generations WHERE tag = ?",
        params![tag],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up cache generation {}: {}", tag, e))?;

    let Some(generation_id) = generation_id else {
      return Ok(false);
    };

    tx.execute(
      "DELETE FROM entries WHERE generation_id = ?",
      params![generation_id],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", tag, e))?;

    tx.execute("DELETE FROM generations WHERE id = ?", params![generation_id])
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", tag, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(true)
  }

  async fn entry_count(&self, tag: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries e
         INNER JOIN generations g ON g.id = e.generation_id
         WHERE g.tag = ?",
        params![tag],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", tag, e))?;

    Ok(count as usize)
  }
}

/// Storage key for a request: hex SHA-256 of the method and fragment-less URL.
fn request_key(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(b"GET ");
  hasher.update(request.cache_url().as_bytes());
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
