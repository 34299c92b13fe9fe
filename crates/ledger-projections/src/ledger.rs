//! Paged, newest-first ledger history.
//!
//! Grounded in `crates/ledger/src/ledger.rs`'s entry list and in the
//! original `projections.py::LedgerEntry` dataclass, adapted from that
//! teacher's double-entry model to the spec's single-entity signed-delta
//! model: one [`LedgerHistoryEntry`] per `CREDIT_*` event, not per debit/
//! credit leg.

use chrono::{DateTime, Utc};
use ledger_types::{EntityType, EventPayload, EventType};
use serde::{Deserialize, Serialize};

/// One historical ledger movement, as shown to a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerHistoryEntry {
    /// Journal position this entry was recorded at.
    pub sequence: u64,
    /// When the movement occurred.
    pub timestamp: DateTime<Utc>,
    /// What kind of movement this was.
    pub event_type: EventType,
    /// Entity the movement applies to.
    pub entity_id: String,
    /// Kind of entity.
    pub entity_type: EntityType,
    /// Non-negative magnitude moved.
    pub amount: f64,
    /// Balance immediately after this movement.
    pub balance_after: f64,
    /// Audit reason.
    pub reason: String,
    /// Mission attribution, if any.
    pub mission_id: Option<String>,
}

/// The full ledger history read model: every `CREDIT_*` event, addressable
/// by entity and pageable newest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerProjection {
    entries: Vec<LedgerHistoryEntry>,
}

impl LedgerProjection {
    /// An empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the history. Ignores events without a ledger
    /// payload.
    pub fn apply(&mut self, sequence: u64, timestamp: DateTime<Utc>, payload: &EventPayload) {
        let Some(delta) = payload.as_ledger_payload() else {
            return;
        };
        self.entries.push(LedgerHistoryEntry {
            sequence,
            timestamp,
            event_type: payload.event_type(),
            entity_id: delta.entity_id.clone(),
            entity_type: delta.entity_type,
            amount: delta.amount,
            balance_after: delta.balance_after,
            reason: delta.reason.clone(),
            mission_id: delta.mission_id.clone(),
        });
    }

    /// `limit` entries for `entity_id`, newest (highest sequence) first,
    /// skipping the first `offset` matches.
    pub fn history(&self, entity_id: &str, offset: usize, limit: usize) -> Vec<LedgerHistoryEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.entity_id == entity_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Total number of history entries recorded for `entity_id`.
    pub fn count_for(&self, entity_id: &str) -> usize {
        self.entries.iter().filter(|e| e.entity_id == entity_id).count()
    }

    /// Total number of history entries across every entity.
    pub fn total_entries(&self) -> usize {
        self.entries.len()
    }

    /// Replace this projection's state wholesale, used when restoring from
    /// a snapshot.
    pub fn restore(&mut self, entries: Vec<LedgerHistoryEntry>) {
        self.entries = entries;
    }

    /// A point-in-time copy of the full entry list, for snapshotting.
    pub fn entries(&self) -> &[LedgerHistoryEntry] {
        &self.entries
    }

    /// Discard all state, used before a full replay.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
