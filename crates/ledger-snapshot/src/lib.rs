#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-snapshot** – point-in-time copies of every projection, so a
//! cold start can skip replaying the full event history.
//!
//! Grounded in the original `snapshot_manager.py`: a snapshot is
//! content-addressed by the journal sequence it was taken at, and a
//! retention policy keeps only the newest `N` (default 10) around,
//! deleting older ones as new snapshots are taken.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_projections::ProjectionSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

mod sql;
pub use sql::SqlSnapshotStore;

/// Number of snapshots retained by default.
pub const DEFAULT_RETENTION: usize = 10;

/// A full copy of every projection, taken at a specific journal sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The journal sequence this snapshot reflects: every event with
    /// `sequence <= this` has already been folded in.
    pub sequence: u64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// The projection state itself.
    pub projections: ProjectionSet,
}

/// Errors a snapshot store can raise.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// I/O failure reading or writing a snapshot file.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored snapshot failed to decode.
    #[error("corrupt snapshot at sequence {sequence}: {source}")]
    Corrupt {
        /// The sequence the corrupt snapshot claimed to be at.
        sequence: u64,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// Where snapshots are persisted.
///
/// Implementations must make `save` atomic with respect to crashes: a
/// reader must never observe a partially written snapshot file.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Durably store `snapshot`, replacing any existing snapshot at the
    /// same sequence.
    async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    /// The snapshot at the highest stored sequence, if any exist.
    async fn load_latest(&self) -> Result<Option<Snapshot>, SnapshotError>;

    /// The sequences of every snapshot currently stored, ascending.
    async fn list_sequences(&self) -> Result<Vec<u64>, SnapshotError>;

    /// Delete snapshots so that at most `retain` remain — the ones at the
    /// highest sequences. Returns how many were deleted.
    async fn prune(&self, retain: usize) -> Result<u64, SnapshotError>;

    /// Save `snapshot`, then prune down to `retain` entries. The default
    /// way snapshots are taken; callers rarely need `save` and `prune`
    /// separately.
    async fn save_with_retention(
        &self,
        snapshot: &Snapshot,
        retain: usize,
    ) -> Result<u64, SnapshotError> {
        self.save(snapshot).await?;
        self.prune(retain).await
    }
}

fn file_name(sequence: u64) -> String {
    format!("snapshot-{sequence:020}.json")
}

fn sequence_from_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("snapshot-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// A snapshot store backed by one JSON file per snapshot in a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Use `dir` to store snapshot files, creating it if necessary on the
    /// next `save`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir.join(file_name(sequence))
    }

    async fn load_from(path: &Path) -> Result<Snapshot, SnapshotError> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt {
            sequence: sequence_from_file_name(
                path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            )
            .unwrap_or(0),
            source: e,
        })
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.path_for(snapshot.sequence);
        let tmp_path = self.dir.join(format!("{}.tmp", file_name(snapshot.sequence)));

        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| SnapshotError::Corrupt {
            sequence: snapshot.sequence,
            source: e,
        })?;

        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        tmp.write_all(&bytes).await?;
        tmp.sync_all().await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        info!(sequence = snapshot.sequence, "snapshot saved");
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let sequences = self.list_sequences().await?;
        let Some(&latest) = sequences.last() else {
            return Ok(None);
        };
        Ok(Some(Self::load_from(&self.path_for(latest)).await?))
    }

    async fn list_sequences(&self) -> Result<Vec<u64>, SnapshotError> {
        let mut sequences = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str().and_then(sequence_from_file_name) {
                sequences.push(name);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    async fn prune(&self, retain: usize) -> Result<u64, SnapshotError> {
        let sequences = self.list_sequences().await?;
        if sequences.len() <= retain {
            return Ok(0);
        }
        let to_delete = &sequences[..sequences.len() - retain];
        for &sequence in to_delete {
            tokio::fs::remove_file(self.path_for(sequence)).await?;
            debug!(sequence, "pruned old snapshot");
        }
        Ok(to_delete.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sequence: u64) -> Snapshot {
        Snapshot {
            sequence,
            created_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            projections: ProjectionSet::new(),
        }
    }

    #[tokio::test]
    async fn save_and_load_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.save(&sample(5)).await.unwrap();
        store.save(&sample(10)).await.unwrap();

        let latest = store.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.sequence, 10);
    }

    #[tokio::test]
    async fn prune_keeps_only_newest_n() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        for seq in [1, 2, 3, 4, 5] {
            store.save(&sample(seq)).await.unwrap();
        }

        let deleted = store.prune(2).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(store.list_sequences().await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn save_with_retention_applies_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        for seq in 1..=(DEFAULT_RETENTION as u64 + 5) {
            store
                .save_with_retention(&sample(seq), DEFAULT_RETENTION)
                .await
                .unwrap();
        }
        assert_eq!(store.list_sequences().await.unwrap().len(), DEFAULT_RETENTION);
    }
}
