//! Batched, restartable copy of a file journal's history into a SQL
//! journal.
//!
//! Grounded in `journal_factory.py::migrate_file_to_postgres`: read a
//! fixed-size batch from the source via [`Journal::read_events_limit`],
//! append each record to the destination (letting the destination's own
//! idempotency dedup make the copy safe to resume after a failure), and
//! report progress every batch. Each iteration reads at most `batch_size`
//! entries regardless of how much history remains, so total read cost is
//! linear in the journal's size rather than quadratic.

use std::sync::Arc;

use ledger_types::SchemaRegistry;
use tracing::info;

use crate::{Journal, JournalError};

/// Progress reported after each migrated batch.
#[derive(Debug, Clone, Copy)]
pub struct MigrationProgress {
    /// Events copied so far.
    pub copied: u64,
    /// Events already present at the destination (by idempotency key) and
    /// therefore skipped.
    pub skipped: u64,
    /// Highest source sequence number processed so far.
    pub last_sequence: u64,
}

/// Copy every event in `source` into `destination`, `batch_size` at a time.
///
/// Safe to call again after a partial failure: already-migrated events are
/// recognized as duplicates by `destination` and skipped. Source records
/// are upcast to their latest schema version using `registry` before being
/// re-appended, so the destination never needs to know about retired
/// payload shapes.
pub async fn migrate_file_to_sql(
    source: Arc<dyn Journal>,
    destination: Arc<dyn Journal>,
    registry: &SchemaRegistry,
    batch_size: u64,
) -> Result<MigrationProgress, JournalError> {
    let mut progress = MigrationProgress {
        copied: 0,
        skipped: 0,
        last_sequence: 0,
    };

    loop {
        let batch = source
            .read_events_limit(Some(progress.last_sequence), batch_size, false)
            .await?;
        if batch.is_empty() {
            break;
        }

        for entry in batch {
            let envelope = registry
                .upcast(entry.envelope.clone())
                .map_err(|e| JournalError::Corrupt {
                    index: entry.sequence,
                    source: serde_json::Error::io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    )),
                })?;
            let outcome = destination.append(envelope).await?;
            if outcome.is_duplicate() {
                progress.skipped += 1;
            } else {
                progress.copied += 1;
            }
            progress.last_sequence = entry.sequence;
        }

        info!(
            copied = progress.copied,
            skipped = progress.skipped,
            last_sequence = progress.last_sequence,
            "migration batch complete"
        );
    }

    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileJournal, SqlJournal};
    use chrono::{DateTime, Utc};
    use ledger_types::{create_credit_allocated, EntityType, EventContext};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn migrates_all_events_and_is_idempotent_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FileJournal::new(dir.path().join("j.jsonl"), true));
        source.initialize().await.unwrap();
        for i in 0..5 {
            source
                .append(
                    create_credit_allocated(
                        "agent-1",
                        EntityType::Agent,
                        1.0,
                        1.0,
                        "grant",
                        None,
                        EventContext {
                            idempotency_key: Some(format!("k{i}")),
                            ..Default::default()
                        },
                        now(),
                    )
                    .unwrap(),
                )
                .await
                .unwrap();
        }

        let destination = Arc::new(SqlJournal::in_memory().await.unwrap());
        destination.initialize().await.unwrap();
        let registry = SchemaRegistry::new();

        let first = migrate_file_to_sql(source.clone(), destination.clone(), &registry, 2)
            .await
            .unwrap();
        assert_eq!(first.copied, 5);
        assert_eq!(destination.count().await.unwrap(), 5);

        // Re-running the migration from scratch must not duplicate events.
        let second = migrate_file_to_sql(source, destination.clone(), &registry, 2)
            .await
            .unwrap();
        assert_eq!(second.copied, 0);
        assert_eq!(destination.count().await.unwrap(), 5);
    }
}
