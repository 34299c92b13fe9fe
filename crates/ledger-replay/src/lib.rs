#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-replay** – rebuilds every projection from the journal, and
//! verifies the result is internally consistent once it has.

mod engine;
mod integrity;

pub use engine::{ReplayEngine, ReplayError, ReplayOutcome};
pub use integrity::{verify, IntegrityReport, IntegrityViolation, Severity};
