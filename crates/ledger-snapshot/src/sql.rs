//! SQL snapshot store: one `credit_snapshots` row per snapshot, matching the
//! relational persistent-state layout alongside `SqlJournal`'s
//! `credit_events` table.
//!
//! A snapshot here is always the whole [`ProjectionSet`], stored under
//! `projection_name = "all"` — this store doesn't split balance/ledger/
//! approval/synergy into separate rows, since every reachable state this
//! crate restores from is the bundled set, never one projection alone.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::{Snapshot, SnapshotError, SnapshotStore};

/// The projection_name stored for a whole-set snapshot row. This store
/// never splits a snapshot across rows, so every row uses this constant.
const PROJECTION_SET_NAME: &str = "all";

/// A [`SnapshotStore`] backed by a `credit_snapshots` table in the same
/// kind of `sqlx` SQLite pool [`ledger_journal::SqlJournal`] uses.
pub struct SqlSnapshotStore {
    pool: SqlitePool,
}

impl SqlSnapshotStore {
    /// Wrap an already-open pool and ensure `credit_snapshots` exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, SnapshotError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open (or create) a SQLite database file at `path` and use it as the
    /// snapshot store.
    pub async fn open(path: &str) -> Result<Self, SnapshotError> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Self::new(pool).await
    }

    async fn migrate(&self) -> Result<(), SnapshotError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_snapshots (
                sequence_number  INTEGER NOT NULL,
                projection_name  TEXT NOT NULL,
                blob             TEXT NOT NULL,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (sequence_number, projection_name)
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(())
    }

    fn row_to_snapshot(
        sequence: i64,
        blob: &str,
        created_at: &str,
    ) -> Result<Snapshot, SnapshotError> {
        let projections = serde_json::from_str(blob).map_err(|e| SnapshotError::Corrupt {
            sequence: sequence as u64,
            source: e,
        })?;
        let created_at: DateTime<Utc> = created_at.parse().map_err(|_| SnapshotError::Corrupt {
            sequence: sequence as u64,
            source: serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad created_at timestamp at sequence {sequence}"),
            )),
        })?;
        Ok(Snapshot {
            sequence: sequence as u64,
            created_at,
            projections,
        })
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SqlSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let blob = serde_json::to_string(&snapshot.projections).map_err(|e| SnapshotError::Corrupt {
            sequence: snapshot.sequence,
            source: e,
        })?;
        sqlx::query(
            r#"
            INSERT INTO credit_snapshots (sequence_number, projection_name, blob, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (sequence_number, projection_name)
            DO UPDATE SET blob = excluded.blob, created_at = excluded.created_at
            "#,
        )
        .bind(snapshot.sequence as i64)
        .bind(PROJECTION_SET_NAME)
        .bind(&blob)
        .bind(snapshot.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        info!(sequence = snapshot.sequence, "snapshot saved");
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let row = sqlx::query(
            "SELECT sequence_number, blob, created_at FROM credit_snapshots \
             WHERE projection_name = ? ORDER BY sequence_number DESC LIMIT 1",
        )
        .bind(PROJECTION_SET_NAME)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let sequence: i64 = row
            .try_get("sequence_number")
            .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let blob: String = row
            .try_get("blob")
            .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        Ok(Some(Self::row_to_snapshot(sequence, &blob, &created_at)?))
    }

    async fn list_sequences(&self) -> Result<Vec<u64>, SnapshotError> {
        let rows = sqlx::query(
            "SELECT sequence_number FROM credit_snapshots WHERE projection_name = ? ORDER BY sequence_number ASC",
        )
        .bind(PROJECTION_SET_NAME)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("sequence_number")
                    .map(|s| s as u64)
                    .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
            })
            .collect()
    }

    async fn prune(&self, retain: usize) -> Result<u64, SnapshotError> {
        let sequences = self.list_sequences().await?;
        if sequences.len() <= retain {
            return Ok(0);
        }
        let to_delete = &sequences[..sequences.len() - retain];
        for &sequence in to_delete {
            sqlx::query("DELETE FROM credit_snapshots WHERE sequence_number = ? AND projection_name = ?")
                .bind(sequence as i64)
                .bind(PROJECTION_SET_NAME)
                .execute(&self.pool)
                .await
                .map_err(|e| SnapshotError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            debug!(sequence, "pruned old snapshot");
        }
        Ok(to_delete.len() as u64)
    }
}
