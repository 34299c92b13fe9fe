//! SQL journal: a `sqlx`-backed SQLite table, idempotency enforced by a
//! `UNIQUE` constraint rather than an in-process index.
//!
//! Grounded in `toka-store-sqlite` for the pool/migrate/broadcast shape and
//! in the original `postgres_journal.py` for the relational schema and the
//! "insert, and treat a constraint violation as a duplicate" append
//! protocol.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_types::{EventEnvelope, EventType, RawEnvelope};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::{AppendOutcome, Journal, JournalEntry, JournalError, JournalMetrics};

/// A journal backed by a `sqlx` SQLite connection pool.
pub struct SqlJournal {
    pool: SqlitePool,
    backing: String,
    idempotency_violations: AtomicU64,
}

impl SqlJournal {
    /// Open (or create) a SQLite database file at `path`.
    pub async fn open(path: &str) -> Result<Self, JournalError> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(JournalError::Database)?;
        Ok(Self {
            pool,
            backing: path.to_string(),
            idempotency_violations: AtomicU64::new(0),
        })
    }

    /// An in-memory database, useful for tests and ephemeral deployments.
    pub async fn in_memory() -> Result<Self, JournalError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(JournalError::Database)?;
        Ok(Self {
            pool,
            backing: "sqlite::memory:".to_string(),
            idempotency_violations: AtomicU64::new(0),
        })
    }

    /// Wrap an already-configured pool, e.g. one shared with other tables.
    pub fn from_pool(pool: SqlitePool, backing: impl Into<String>) -> Self {
        Self {
            pool,
            backing: backing.into(),
            idempotency_violations: AtomicU64::new(0),
        }
    }

    async fn migrate(&self) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS journal_entries (
                sequence         INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id         TEXT NOT NULL UNIQUE,
                idempotency_key  TEXT NOT NULL UNIQUE,
                event_type       TEXT NOT NULL,
                schema_version   INTEGER NOT NULL,
                timestamp        TEXT NOT NULL,
                actor_id         TEXT,
                correlation_id   TEXT,
                causation_id     TEXT,
                payload          TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_journal_event_type ON journal_entries(event_type)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<JournalEntry, JournalError> {
        let sequence: i64 = row.try_get("sequence")?;
        let event_id: String = row.try_get("event_id")?;
        let idempotency_key: String = row.try_get("idempotency_key")?;
        let event_type_str: String = row.try_get("event_type")?;
        let schema_version: i64 = row.try_get("schema_version")?;
        let timestamp: String = row.try_get("timestamp")?;
        let actor_id: Option<String> = row.try_get("actor_id")?;
        let correlation_id: Option<String> = row.try_get("correlation_id")?;
        let causation_id: Option<String> = row.try_get("causation_id")?;
        let payload_str: String = row.try_get("payload")?;

        let event_type: EventType = serde_json::from_value(serde_json::Value::String(event_type_str))
            .map_err(|e| JournalError::Corrupt {
                index: sequence as u64,
                source: e,
            })?;
        let payload: serde_json::Value =
            serde_json::from_str(&payload_str).map_err(|e| JournalError::Corrupt {
                index: sequence as u64,
                source: e,
            })?;
        let timestamp: DateTime<Utc> = timestamp
            .parse()
            .map_err(|_| JournalError::Open(format!("bad timestamp in row {sequence}")))?;

        Ok(JournalEntry {
            sequence: sequence as u64,
            envelope: RawEnvelope {
                event_id: event_id
                    .parse()
                    .map_err(|_| JournalError::Open(format!("bad event_id in row {sequence}")))?,
                idempotency_key,
                event_type,
                schema_version: schema_version as u32,
                timestamp,
                actor_id,
                correlation_id,
                causation_id,
                payload,
            },
        })
    }
}

#[async_trait]
impl Journal for SqlJournal {
    async fn initialize(&self) -> Result<(), JournalError> {
        self.migrate().await
    }

    async fn append(&self, envelope: EventEnvelope) -> Result<AppendOutcome, JournalError> {
        let raw = RawEnvelope::from(&envelope);
        let payload_str = serde_json::to_string(&raw.payload).map_err(|e| JournalError::Corrupt {
            index: 0,
            source: e,
        })?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO journal_entries
                (event_id, idempotency_key, event_type, schema_version, timestamp, actor_id, correlation_id, causation_id, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(raw.event_id.to_string())
        .bind(&raw.idempotency_key)
        .bind(raw.event_type.as_str())
        .bind(raw.schema_version as i64)
        .bind(raw.timestamp.to_rfc3339())
        .bind(&raw.actor_id)
        .bind(&raw.correlation_id)
        .bind(&raw.causation_id)
        .bind(&payload_str)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.idempotency_violations.fetch_add(1, Ordering::Relaxed);
            debug!(idempotency_key = %raw.idempotency_key, "rejected duplicate append");
            let row = sqlx::query("SELECT * FROM journal_entries WHERE idempotency_key = ?")
                .bind(&raw.idempotency_key)
                .fetch_one(&self.pool)
                .await?;
            return Ok(AppendOutcome::Duplicate(Self::row_to_entry(&row)?));
        }

        let row = sqlx::query("SELECT * FROM journal_entries WHERE event_id = ?")
            .bind(raw.event_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(AppendOutcome::Appended(Self::row_to_entry(&row)?))
    }

    async fn read_events(
        &self,
        after: Option<u64>,
        skip_corrupted: bool,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let after = after.unwrap_or(0) as i64;
        let rows = sqlx::query("SELECT * FROM journal_entries WHERE sequence > ? ORDER BY sequence ASC")
            .bind(after)
            .fetch_all(&self.pool)
            .await?;

        if !skip_corrupted {
            return rows.iter().map(Self::row_to_entry).collect();
        }

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_entry(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping corrupted journal row"),
            }
        }
        Ok(entries)
    }

    async fn read_events_limit(
        &self,
        after: Option<u64>,
        limit: u64,
        skip_corrupted: bool,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let after = after.unwrap_or(0) as i64;
        let rows = sqlx::query(
            "SELECT * FROM journal_entries WHERE sequence > ? ORDER BY sequence ASC LIMIT ?",
        )
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        if !skip_corrupted {
            return rows.iter().map(Self::row_to_entry).collect();
        }

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_entry(row) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "skipping corrupted journal row"),
            }
        }
        Ok(entries)
    }

    async fn count(&self) -> Result<u64, JournalError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM journal_entries")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn metrics(&self) -> Result<JournalMetrics, JournalError> {
        let total_events = self.count().await?;
        let size_bytes = tokio::fs::metadata(&self.backing)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(JournalMetrics {
            total_events,
            size_bytes,
            idempotency_violations: self.idempotency_violations.load(Ordering::Relaxed),
            backing: self.backing.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use ledger_types::{create_credit_allocated, EntityType, EventContext};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample(idempotency_key: &str) -> EventEnvelope {
        create_credit_allocated(
            "agent-1",
            EntityType::Agent,
            10.0,
            10.0,
            "grant",
            None,
            EventContext {
                idempotency_key: Some(idempotency_key.to_string()),
                ..Default::default()
            },
            now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let journal = SqlJournal::in_memory().await.unwrap();
        journal.initialize().await.unwrap();

        journal.append(sample("a")).await.unwrap();
        journal.append(sample("b")).await.unwrap();

        let events = journal.read_events(None, false).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
    }

    #[tokio::test]
    async fn read_events_limit_stops_at_the_bound() {
        let journal = SqlJournal::in_memory().await.unwrap();
        journal.initialize().await.unwrap();
        for i in 0..5 {
            journal.append(sample(&format!("k{i}"))).await.unwrap();
        }

        let page = journal.read_events_limit(None, 2, false).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sequence, 1);
        assert_eq!(page[1].sequence, 2);

        let rest = journal
            .read_events_limit(Some(page[1].sequence), 10, false)
            .await
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].sequence, 3);
    }

    #[tokio::test]
    async fn unique_constraint_rejects_duplicate() {
        let journal = SqlJournal::in_memory().await.unwrap();
        journal.initialize().await.unwrap();

        journal.append(sample("dup")).await.unwrap();
        let second = journal.append(sample("dup")).await.unwrap();
        assert!(second.is_duplicate());
        assert_eq!(journal.count().await.unwrap(), 1);
    }
}
