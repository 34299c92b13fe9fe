#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-core** – the assembled event-sourced credit ledger.
//!
//! Wires [`ledger_journal`], [`ledger_bus`], [`ledger_projections`],
//! [`ledger_replay`] and [`ledger_snapshot`] into one [`LedgerCore`] facade:
//! construct it once via [`LedgerCore::bootstrap`], then call its producer
//! methods (`allocate_credit`, `request_approval`, `record_collaboration`,
//! ...) to append events and its consumer methods (`balance`,
//! `ledger_history`, `approval_state`, ...) to read the projections those
//! events maintain.

mod config;
mod facade;
mod projection_updater;

pub use config::{
    FileJournalConfig, JournalBackend, JournalConfig, LedgerConfig, ReplayConfig, SnapshotConfig,
    SqlJournalConfig,
};
pub use facade::{CoreError, CoreMetrics, LedgerCore};
