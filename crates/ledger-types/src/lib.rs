#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-types** – Event envelope, closed event catalogue and schema
//! evolution machinery for the credit ledger core.
//!
//! This crate has no dependency on any storage, bus or projection code. It
//! defines the shape every other `ledger-*` crate agrees on: the
//! [`EventEnvelope`] that is appended to a journal, the closed
//! [`EventType`]/[`EventPayload`] catalogue, and the [`SchemaRegistry`] that
//! lets a payload shape grow across versions without breaking events already
//! on disk.

mod catalogue;
mod envelope;
mod schema;

pub use catalogue::{
    ApprovalResolutionPayload, ApprovalRequestedPayload, CollaborationRecordedPayload,
    EntityType, EocRegulatedPayload, EventPayload, EventType, LedgerPayload, MissionRatedPayload,
    ReuseDetectedPayload,
};
pub use envelope::{
    create_approval_approved, create_approval_expired, create_approval_rejected,
    create_approval_requested, create_collaboration_recorded, create_credit_allocated,
    create_credit_consumed, create_credit_refunded, create_credit_regenerated,
    create_credit_withdrawn, create_eoc_regulated, create_mission_rated, create_reuse_detected,
    EventContext, EventEnvelope, EnvelopeError, RawEnvelope,
};
pub use schema::{SchemaError, SchemaRegistry, Upcaster, VersionHistoryEntry};

/// Common imports for crates that work with ledger events.
pub mod prelude {
    pub use crate::catalogue::*;
    pub use crate::envelope::{EventContext, EventEnvelope, EnvelopeError, RawEnvelope};
    pub use crate::schema::{SchemaError, SchemaRegistry};
}
