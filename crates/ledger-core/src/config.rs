//! Configuration surface for the ledger core.
//!
//! Mirrors the teacher runtime's `Environment`/`from_env` pattern: sane
//! defaults baked in, every field overridable by an environment variable,
//! and `anyhow::Context` attached so a bad override points at the exact
//! variable that was wrong.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Which journal implementation backs the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalBackend {
    /// The fsync'd JSONL file journal.
    File,
    /// The `sqlx`/SQLite journal.
    Sql,
}

impl JournalBackend {
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(JournalBackend::File),
            "sql" => Ok(JournalBackend::Sql),
            other => anyhow::bail!("unknown journal backend {other:?}, expected \"file\" or \"sql\""),
        }
    }
}

/// File journal settings.
#[derive(Debug, Clone)]
pub struct FileJournalConfig {
    /// Path to the JSONL file.
    pub path: PathBuf,
    /// Whether to fsync after every append.
    pub fsync: bool,
}

/// SQL journal settings.
#[derive(Debug, Clone)]
pub struct SqlJournalConfig {
    /// SQLite file path (or `:memory:`).
    pub connection: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// Additional connections allowed beyond `pool_size` under load.
    pub max_overflow: u32,
}

/// Everything needed to open a journal, of either backend.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Which backend is active.
    pub backend: JournalBackend,
    /// Settings for the file backend (read even if `backend` is `Sql`, so
    /// switching backends doesn't require re-specifying the rest).
    pub file: FileJournalConfig,
    /// Settings for the SQL backend.
    pub sql: SqlJournalConfig,
}

/// Replay behavior settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Whether to run the integrity pass after a replay. Disabling this
    /// only skips the check; replay itself always runs in full.
    pub verify_integrity: bool,
}

/// Snapshot behavior settings.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Whether snapshots are taken at all.
    pub enabled: bool,
    /// How many snapshots to retain.
    pub retention: usize,
    /// Directory snapshots are stored under.
    pub dir: PathBuf,
}

/// The full ledger core configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Journal settings.
    pub journal: JournalConfig,
    /// Replay settings.
    pub replay: ReplayConfig,
    /// Snapshot settings.
    pub snapshot: SnapshotConfig,
}

impl LedgerConfig {
    /// A configuration using the file journal at `path`, with snapshots
    /// disabled and integrity verification on. Convenient for tests and
    /// single-process deployments that don't need the full environment
    /// surface.
    pub fn file_backed(path: impl Into<PathBuf>) -> Self {
        Self {
            journal: JournalConfig {
                backend: JournalBackend::File,
                file: FileJournalConfig {
                    path: path.into(),
                    fsync: true,
                },
                sql: SqlJournalConfig {
                    connection: ":memory:".into(),
                    pool_size: 5,
                    max_overflow: 5,
                },
            },
            replay: ReplayConfig {
                verify_integrity: true,
            },
            snapshot: SnapshotConfig {
                enabled: false,
                retention: ledger_snapshot::DEFAULT_RETENTION,
                dir: PathBuf::from("snapshots"),
            },
        }
    }

    /// Load configuration from environment variables, falling back to the
    /// file-backed defaults for anything unset.
    ///
    /// Recognized variables: `LEDGER_JOURNAL_BACKEND` (`file`|`sql`),
    /// `LEDGER_JOURNAL_FILE_PATH`, `LEDGER_JOURNAL_FILE_FSYNC`,
    /// `LEDGER_JOURNAL_SQL_CONNECTION`, `LEDGER_JOURNAL_SQL_POOL_SIZE`,
    /// `LEDGER_JOURNAL_SQL_MAX_OVERFLOW`, `LEDGER_REPLAY_VERIFY_INTEGRITY`,
    /// `LEDGER_SNAPSHOT_ENABLED`, `LEDGER_SNAPSHOT_RETENTION`,
    /// `LEDGER_SNAPSHOT_DIR`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::file_backed("ledger.jsonl");

        if let Ok(backend) = std::env::var("LEDGER_JOURNAL_BACKEND") {
            config.journal.backend = JournalBackend::from_str(&backend)
                .context("LEDGER_JOURNAL_BACKEND")?;
        }
        if let Ok(path) = std::env::var("LEDGER_JOURNAL_FILE_PATH") {
            config.journal.file.path = PathBuf::from(path);
        }
        if let Ok(fsync) = std::env::var("LEDGER_JOURNAL_FILE_FSYNC") {
            config.journal.file.fsync = parse_bool(&fsync).context("LEDGER_JOURNAL_FILE_FSYNC")?;
        }
        if let Ok(connection) = std::env::var("LEDGER_JOURNAL_SQL_CONNECTION") {
            config.journal.sql.connection = connection;
        }
        if let Ok(pool_size) = std::env::var("LEDGER_JOURNAL_SQL_POOL_SIZE") {
            config.journal.sql.pool_size = pool_size
                .parse()
                .context("LEDGER_JOURNAL_SQL_POOL_SIZE")?;
        }
        if let Ok(max_overflow) = std::env::var("LEDGER_JOURNAL_SQL_MAX_OVERFLOW") {
            config.journal.sql.max_overflow = max_overflow
                .parse()
                .context("LEDGER_JOURNAL_SQL_MAX_OVERFLOW")?;
        }
        if let Ok(verify) = std::env::var("LEDGER_REPLAY_VERIFY_INTEGRITY") {
            config.replay.verify_integrity =
                parse_bool(&verify).context("LEDGER_REPLAY_VERIFY_INTEGRITY")?;
        }
        if let Ok(enabled) = std::env::var("LEDGER_SNAPSHOT_ENABLED") {
            config.snapshot.enabled = parse_bool(&enabled).context("LEDGER_SNAPSHOT_ENABLED")?;
        }
        if let Ok(retention) = std::env::var("LEDGER_SNAPSHOT_RETENTION") {
            config.snapshot.retention = retention.parse().context("LEDGER_SNAPSHOT_RETENTION")?;
        }
        if let Ok(dir) = std::env::var("LEDGER_SNAPSHOT_DIR") {
            config.snapshot.dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
