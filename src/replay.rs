//! Durable queue of failed state-changing requests, replayed when a
//! deferred-sync trigger reports connectivity has returned.
//!
//! The queue lives in its own SQLite database, distinct from the cache
//! store. A record leaves the queue exactly once: on confirmed successful
//! replay, or when the bounded-retry policy abandons it.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::net::NetworkClient;
use crate::request::RequestSnapshot;

/// A state-changing request awaiting replay.
#[derive(Debug, Clone)]
pub struct MutationRecord {
  pub id: Uuid,
  pub request: RequestSnapshot,
  pub tag: String,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
}

/// Outcome of one replay trigger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
  /// Records replayed successfully and removed
  pub replayed: usize,
  /// Records that failed again and stay queued
  pub retained: usize,
  /// Records dropped by the bounded-retry policy
  pub abandoned: usize,
}

/// SQLite-backed mutation replay queue.
pub struct ReplayQueue {
  conn: Mutex<Connection>,
  max_attempts: u32,
}

impl ReplayQueue {
  /// Open the queue at the default location.
  pub fn open(max_attempts: u32) -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn, max_attempts)
  }

  /// Open an in-memory queue (used by tests).
  pub fn open_in_memory(max_attempts: u32) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

    Self::from_connection(conn, max_attempts)
  }

  fn from_connection(conn: Connection, max_attempts: u32) -> Result<Self> {
    let queue = Self {
      conn: Mutex::new(conn),
      max_attempts,
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offsync").join("queue.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }

  /// Record a failed state-changing request for later replay.
  pub fn enqueue(&self, request: &RequestSnapshot, tag: &str) -> Result<MutationRecord> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let record = MutationRecord {
      id: Uuid::new_v4(),
      request: request.clone(),
      tag: tag.to_string(),
      enqueued_at: Utc::now(),
      attempts: 0,
    };

    let request_json = serde_json::to_string(&record.request)
      .map_err(|e| eyre!("Failed to serialize request: {}", e))?;
    let enqueued_at = record.enqueued_at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();

    conn
      .execute(
        "INSERT INTO mutation_queue (id, tag, request, enqueued_at, attempts)
         VALUES (?, ?, ?, ?, 0)",
        params![record.id.to_string(), record.tag, request_json, enqueued_at],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    info!(id = %record.id, url = %record.request.url, tag, "Queued mutation for replay");

    Ok(record)
  }

  /// Pending records for a tag, oldest first.
  pub fn pending(&self, tag: &str) -> Result<Vec<MutationRecord>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, request, enqueued_at, attempts FROM mutation_queue
         WHERE tag = ? ORDER BY enqueued_at, id",
      )
      .map_err(|e| eyre!("Failed to prepare pending query: {}", e))?;

    let rows: Vec<(String, String, String, u32)> = stmt
      .query_map(params![tag], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .map_err(|e| eyre!("Failed to query pending mutations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut records = Vec::with_capacity(rows.len());
    for (id, request_json, enqueued_at_str, attempts) in rows {
      let id = Uuid::parse_str(&id).map_err(|e| eyre!("Corrupt record id '{}': {}", id, e))?;
      let request: RequestSnapshot = serde_json::from_str(&request_json)
        .map_err(|e| eyre!("Failed to deserialize queued request: {}", e))?;
      let enqueued_at = parse_datetime(&enqueued_at_str)?;

      records.push(MutationRecord {
        id,
        request,
        tag: tag.to_string(),
        enqueued_at,
        attempts,
      });
    }

    Ok(records)
  }

  /// Remove a record. Idempotent: removing an already-removed record is a
  /// no-op, and the return value says whether a row actually went away.
  pub fn remove(&self, id: Uuid) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let deleted = conn
      .execute(
        "DELETE FROM mutation_queue WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;

    Ok(deleted > 0)
  }

  fn bump_attempts(&self, id: Uuid) -> Result<u32> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE mutation_queue SET attempts = attempts + 1 WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to update attempts for {}: {}", id, e))?;

    let attempts: u32 = conn
      .query_row(
        "SELECT attempts FROM mutation_queue WHERE id = ?",
        params![id.to_string()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read attempts for {}: {}", id, e))?;

    Ok(attempts)
  }

  /// Replay every pending record matching the trigger tag.
  ///
  /// Records are replayed sequentially, oldest first, to avoid reordering
  /// effects on endpoints that are not guaranteed idempotent. A record is
  /// removed on confirmed success; otherwise its attempt counter goes up,
  /// and once it reaches the configured bound the record is abandoned.
  pub async fn replay<N: NetworkClient>(&self, tag: &str, net: &N) -> Result<ReplayOutcome> {
    let pending = self.pending(tag)?;
    let mut outcome = ReplayOutcome::default();

    for record in pending {
      let succeeded = match net.fetch(&record.request).await {
        Ok(response) if response.is_ok() => true,
        Ok(response) => {
          debug!(id = %record.id, status = response.status, "Replay rejected by server");
          false
        }
        Err(e) => {
          debug!(id = %record.id, "Replay transport failure: {}", e);
          false
        }
      };

      if succeeded {
        self.remove(record.id)?;
        outcome.replayed += 1;
        info!(id = %record.id, url = %record.request.url, "Replayed queued mutation");
        continue;
      }

      let attempts = self.bump_attempts(record.id)?;
      if attempts >= self.max_attempts {
        self.remove(record.id)?;
        outcome.abandoned += 1;
        warn!(
          id = %record.id,
          url = %record.request.url,
          attempts,
          "Abandoning mutation after repeated replay failures"
        );
      } else {
        outcome.retained += 1;
      }
    }

    Ok(outcome)
  }
}

/// Schema for the replay queue.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mutation_queue (
    id TEXT PRIMARY KEY,
    tag TEXT NOT NULL,
    request TEXT NOT NULL,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now')),
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_mutation_queue_tag ON mutation_queue(tag);
"#;

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.6f")
    .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::MockNetwork;
  use crate::request::Method;

  const TAG: &str = "background-sync";

  fn submission(n: u32) -> RequestSnapshot {
    RequestSnapshot::mutation(
      Method::Post,
      format!("https://app.test/api/predict?n={}", n),
      format!("{{\"n\":{}}}", n).into_bytes(),
    )
  }

  #[tokio::test]
  async fn successful_replay_removes_the_record() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let net = MockNetwork::online();
    net.route_text("https://app.test/api/predict?n=1", 200, "ok");

    queue.enqueue(&submission(1), TAG).unwrap();
    let outcome = queue.replay(TAG, &net).await.unwrap();

    assert_eq!(outcome.replayed, 1);
    assert!(queue.pending(TAG).unwrap().is_empty());
  }

  #[tokio::test]
  async fn duplicate_trigger_is_a_noop() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let net = MockNetwork::online();
    net.route_text("https://app.test/api/predict?n=1", 200, "ok");

    queue.enqueue(&submission(1), TAG).unwrap();
    queue.replay(TAG, &net).await.unwrap();

    let outcome = queue.replay(TAG, &net).await.unwrap();
    assert_eq!(outcome, ReplayOutcome::default());
  }

  #[tokio::test]
  async fn failed_replay_increments_attempts_and_retains() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let net = MockNetwork::offline();

    queue.enqueue(&submission(1), TAG).unwrap();
    let outcome = queue.replay(TAG, &net).await.unwrap();

    assert_eq!(outcome.retained, 1);
    let pending = queue.pending(TAG).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
  }

  #[tokio::test]
  async fn record_is_abandoned_at_the_retry_bound() {
    let queue = ReplayQueue::open_in_memory(2).unwrap();
    let net = MockNetwork::offline();

    queue.enqueue(&submission(1), TAG).unwrap();

    let first = queue.replay(TAG, &net).await.unwrap();
    assert_eq!(first.retained, 1);

    let second = queue.replay(TAG, &net).await.unwrap();
    assert_eq!(second.abandoned, 1);
    assert!(queue.pending(TAG).unwrap().is_empty());
  }

  #[tokio::test]
  async fn replays_run_sequentially_in_enqueue_order() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let net = MockNetwork::online();
    net.route_text("https://app.test/api/predict?n=1", 200, "ok");
    net.route_text("https://app.test/api/predict?n=2", 200, "ok");
    net.route_text("https://app.test/api/predict?n=3", 200, "ok");

    for n in 1..=3 {
      queue.enqueue(&submission(n), TAG).unwrap();
    }
    queue.replay(TAG, &net).await.unwrap();

    assert_eq!(
      net.fetched(),
      vec![
        "https://app.test/api/predict?n=1".to_string(),
        "https://app.test/api/predict?n=2".to_string(),
        "https://app.test/api/predict?n=3".to_string(),
      ]
    );
  }

  #[tokio::test]
  async fn triggers_only_touch_matching_tags() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let net = MockNetwork::online();
    net.route_text("https://app.test/api/predict?n=1", 200, "ok");

    queue.enqueue(&submission(1), TAG).unwrap();
    queue.enqueue(&submission(2), "other-queue").unwrap();

    let outcome = queue.replay(TAG, &net).await.unwrap();
    assert_eq!(outcome.replayed, 1);
    assert_eq!(queue.pending("other-queue").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn server_rejection_counts_as_failure() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let net = MockNetwork::online();
    net.route_text("https://app.test/api/predict?n=1", 500, "boom");

    queue.enqueue(&submission(1), TAG).unwrap();
    let outcome = queue.replay(TAG, &net).await.unwrap();

    assert_eq!(outcome.retained, 1);
  }

  #[test]
  fn remove_is_idempotent() {
    let queue = ReplayQueue::open_in_memory(5).unwrap();
    let record = queue.enqueue(&submission(1), TAG).unwrap();

    assert!(queue.remove(record.id).unwrap());
    assert!(!queue.remove(record.id).unwrap());
  }
}
