#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-journal** – the append-only, crash-safe journal the credit
//! ledger is built on.
//!
//! A [`Journal`] accepts [`ledger_types::EventEnvelope`]s and hands back a
//! durable, monotonically sequenced [`JournalEntry`]. Two backends share the
//! same trait and the same dedup semantics: [`file::FileJournal`] (a
//! fsync'd JSONL file, for embedded/single-process deployments) and
//! [`sql::SqlJournal`] (a `sqlx`-backed SQLite table, for deployments that
//! already run a relational store). [`migrate::migrate_file_to_sql`] moves
//! a file journal's history into a SQL journal in restartable batches.

mod file;
mod migrate;
mod sql;

use async_trait::async_trait;
use ledger_types::RawEnvelope;
use thiserror::Error;

pub use file::FileJournal;
pub use migrate::{migrate_file_to_sql, MigrationProgress};
pub use sql::SqlJournal;

/// A durably stored event, tagged with its position in the journal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JournalEntry {
    /// Monotonically increasing position, starting at 1.
    pub sequence: u64,
    /// The event, not yet upcast to the latest schema version.
    pub envelope: RawEnvelope,
}

/// The result of appending an event: either it is new, or it is a repeat
/// of an idempotency key the journal already holds.
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    /// The event was new and has been durably recorded.
    Appended(JournalEntry),
    /// An event with the same idempotency key was already recorded; the
    /// journal was not modified and the existing entry is returned.
    Duplicate(JournalEntry),
}

impl AppendOutcome {
    /// The entry either way — the one just appended, or the one already on
    /// disk that caused the duplicate.
    pub fn entry(&self) -> &JournalEntry {
        match self {
            AppendOutcome::Appended(e) | AppendOutcome::Duplicate(e) => e,
        }
    }

    /// True if this append was rejected as a duplicate.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

/// Point-in-time counters a journal exposes for operational visibility.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JournalMetrics {
    /// Total events durably recorded.
    pub total_events: u64,
    /// Approximate size of the backing store, in bytes.
    pub size_bytes: u64,
    /// Number of append calls rejected as duplicates since the journal was
    /// opened (not persisted across restarts).
    pub idempotency_violations: u64,
    /// Where the journal is backed — a file path or a connection string.
    pub backing: String,
}

/// Errors a journal backend can raise.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The backing file or database could not be opened.
    #[error("failed to open journal: {0}")]
    Open(String),
    /// A stored record could not be decoded. The `index` is the zero-based
    /// position of the offending record.
    #[error("corrupt journal record at index {index}: {source}")]
    Corrupt {
        /// Zero-based position of the unreadable record.
        index: u64,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// I/O failure while reading or writing the backing store.
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// SQL backend failure.
    #[error("journal database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The append-only journal interface both backends implement.
///
/// Every method is safe to call concurrently: implementations serialize
/// writes internally so callers never need an external lock.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Open (or create) the backing store and recover from any previous
    /// crash. Must be called once before any other method.
    async fn initialize(&self) -> Result<(), JournalError>;

    /// Durably record `envelope`, unless its idempotency key has already
    /// been recorded.
    async fn append(&self, envelope: ledger_types::EventEnvelope) -> Result<AppendOutcome, JournalError>;

    /// All entries with `sequence > after`, in sequence order.
    ///
    /// A record that fails to decode is handled per `skip_corrupted`: when
    /// true it is logged and skipped so the rest of the stream is still
    /// returned; when false the whole read fails with
    /// [`JournalError::Corrupt`].
    async fn read_events(
        &self,
        after: Option<u64>,
        skip_corrupted: bool,
    ) -> Result<Vec<JournalEntry>, JournalError>;

    /// Like [`read_events`](Journal::read_events), but returns at most
    /// `limit` entries. Unlike slicing the result of `read_events` down to
    /// size, implementations bound the work they do to roughly `limit`
    /// regardless of how much history follows `after` — this is the method
    /// batched consumers such as [`migrate::migrate_file_to_sql`] should
    /// call.
    async fn read_events_limit(
        &self,
        after: Option<u64>,
        limit: u64,
        skip_corrupted: bool,
    ) -> Result<Vec<JournalEntry>, JournalError>;

    /// Total number of events currently recorded.
    async fn count(&self) -> Result<u64, JournalError>;

    /// Operational counters for this journal.
    async fn metrics(&self) -> Result<JournalMetrics, JournalError>;
}
