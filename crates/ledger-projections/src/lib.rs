#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-projections** – the in-memory read models the credit ledger
//! exposes to callers: per-entity balance, paged ledger history, approval
//! request state, and collaboration/reuse/externality/rating counters.
//!
//! Every projection is a pure fold over the event stream: `apply` never
//! returns an error, because a projection cannot reject an event the
//! journal already accepted. Invariant violations are recorded as
//! anomalies instead, surfaced through each projection's `anomalies()`
//! (where applicable) rather than by refusing to update.

mod approval;
mod balance;
mod ledger;
mod set;
mod synergy;

pub use approval::{ApprovalProjection, ApprovalRecord, ApprovalState};
pub use balance::{signed_delta, BalanceProjection};
pub use ledger::{LedgerHistoryEntry, LedgerProjection};
pub use set::ProjectionSet;
pub use synergy::{CollaborationRecord, SynergyProjection};
