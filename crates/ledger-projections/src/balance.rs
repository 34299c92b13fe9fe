//! Per-entity running balance, folded from the `CREDIT_*` event stream.
//!
//! Only `CREDIT_WITHDRAWN` may legitimately drive a balance negative. Any
//! other event type that would have produced a negative balance is still
//! applied — the projection is a pure fold of history, it never rejects an
//! event the journal already accepted — but the occurrence is counted as a
//! governance anomaly so downstream tooling can flag it.

use std::collections::HashMap;

use ledger_types::{EventPayload, EventType};
use serde::{Deserialize, Serialize};
use tracing::warn;

const BALANCE_MAGNITUDE_LIMIT: f64 = 1e15;

/// Absolute difference tolerated between the accumulated balance and the
/// caller-supplied `balance_after` before it is flagged as diverged.
const RECONCILE_TOLERANCE: f64 = 1e-6;

/// The sign a `CREDIT_*` event type contributes to an entity's running
/// balance: allocations/refunds/regenerations add, consumption/withdrawal
/// subtract. Events outside the ledger family contribute nothing.
pub fn signed_delta(event_type: EventType, amount: f64) -> f64 {
    match event_type {
        EventType::CreditAllocated | EventType::CreditRefunded | EventType::CreditRegenerated => {
            amount
        }
        EventType::CreditConsumed | EventType::CreditWithdrawn => -amount,
        _ => 0.0,
    }
}

/// The balance read model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceProjection {
    balances: HashMap<String, f64>,
    anomalies: u64,
}

impl BalanceProjection {
    /// An empty projection with no entities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the projection. Events without a ledger payload
    /// (approvals, collaboration, etc.) are ignored.
    ///
    /// The new balance is `old + signed_delta(amount)`, mirroring
    /// `ledger.rs`'s `account.balance += / -= amount`; the event's
    /// `balance_after` field is never trusted verbatim — it is only
    /// compared against the accumulated result to detect a diverged caller.
    pub fn apply(&mut self, payload: &EventPayload) {
        let Some(delta) = payload.as_ledger_payload() else {
            return;
        };
        let event_type = payload.event_type();
        let previous = self.get(&delta.entity_id);
        let computed = previous + signed_delta(event_type, delta.amount);

        let stored = if !computed.is_finite() {
            warn!(
                entity_id = %delta.entity_id,
                "computed balance outside finite range, balance left unchanged"
            );
            self.anomalies += 1;
            previous
        } else if computed.abs() > BALANCE_MAGNITUDE_LIMIT {
            let clamped = computed.clamp(-BALANCE_MAGNITUDE_LIMIT, BALANCE_MAGNITUDE_LIMIT);
            warn!(
                entity_id = %delta.entity_id,
                computed,
                clamped,
                "computed balance outside representable magnitude, clamping"
            );
            self.anomalies += 1;
            clamped
        } else {
            computed
        };

        if stored < 0.0 && event_type != EventType::CreditWithdrawn {
            warn!(
                entity_id = %delta.entity_id,
                event_type = ?event_type,
                "non-withdrawal event drove balance negative"
            );
            self.anomalies += 1;
        }

        if (stored - delta.balance_after).abs() > RECONCILE_TOLERANCE {
            warn!(
                entity_id = %delta.entity_id,
                computed = stored,
                claimed = delta.balance_after,
                "caller-supplied balance_after diverges from accumulated balance"
            );
            self.anomalies += 1;
        }

        self.balances.insert(delta.entity_id.clone(), stored);
    }

    /// The current balance for `entity_id`, or `0.0` if it has never
    /// appeared in a `CREDIT_*` event.
    pub fn get(&self, entity_id: &str) -> f64 {
        self.balances.get(entity_id).copied().unwrap_or(0.0)
    }

    /// A point-in-time copy of every known entity balance.
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.balances.clone()
    }

    /// Number of events that violated the "only withdrawal goes negative"
    /// or representable-magnitude invariants.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Replace this projection's state wholesale, used when restoring from
    /// a snapshot.
    pub fn restore(&mut self, balances: HashMap<String, f64>, anomalies: u64) {
        self.balances = balances;
        self.anomalies = anomalies;
    }

    /// Discard all state, used before a full replay.
    pub fn clear(&mut self) {
        self.balances.clear();
        self.anomalies = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::{EntityType, LedgerPayload};

    fn ledger_event(
        event_type: EventType,
        entity_id: &str,
        amount: f64,
        balance_after: f64,
    ) -> EventPayload {
        let payload = LedgerPayload {
            entity_id: entity_id.to_string(),
            entity_type: EntityType::Agent,
            amount,
            balance_after,
            reason: "test".into(),
            mission_id: None,
            metadata: None,
        };
        match event_type {
            EventType::CreditAllocated => EventPayload::CreditAllocated(payload),
            EventType::CreditConsumed => EventPayload::CreditConsumed(payload),
            EventType::CreditWithdrawn => EventPayload::CreditWithdrawn(payload),
            _ => unreachable!(),
        }
    }

    #[test]
    fn accumulates_signed_deltas_per_entity() {
        let mut proj = BalanceProjection::new();
        proj.apply(&ledger_event(EventType::CreditAllocated, "a", 100.0, 100.0));
        proj.apply(&ledger_event(EventType::CreditConsumed, "a", 20.0, 80.0));
        assert_eq!(proj.get("a"), 80.0);
        assert_eq!(proj.get("unknown"), 0.0);
        assert_eq!(proj.anomalies(), 0);
    }

    #[test]
    fn ignores_caller_supplied_balance_after() {
        let mut proj = BalanceProjection::new();
        // Claims balance_after = 999.0, but the accumulated result from a
        // fresh entity plus a +1.0 delta is 1.0 — the projection must store
        // its own computation, not the caller's claim.
        proj.apply(&ledger_event(EventType::CreditAllocated, "a", 1.0, 999.0));
        assert_eq!(proj.get("a"), 1.0);
        assert_eq!(proj.anomalies(), 1);
    }

    #[test]
    fn withdrawal_may_go_negative_without_anomaly() {
        let mut proj = BalanceProjection::new();
        proj.apply(&ledger_event(EventType::CreditAllocated, "a", 10.0, 10.0));
        proj.apply(&ledger_event(EventType::CreditWithdrawn, "a", 30.0, -20.0));
        assert_eq!(proj.get("a"), -20.0);
        assert_eq!(proj.anomalies(), 0);
    }

    #[test]
    fn non_withdrawal_negative_balance_is_flagged() {
        let mut proj = BalanceProjection::new();
        proj.apply(&ledger_event(EventType::CreditConsumed, "a", 5.0, -5.0));
        assert_eq!(proj.get("a"), -5.0);
        assert_eq!(proj.anomalies(), 1);
    }

    #[test]
    fn magnitude_beyond_limit_is_clamped() {
        let mut proj = BalanceProjection::new();
        proj.apply(&ledger_event(
            EventType::CreditAllocated,
            "a",
            BALANCE_MAGNITUDE_LIMIT * 2.0,
            BALANCE_MAGNITUDE_LIMIT * 2.0,
        ));
        assert_eq!(proj.get("a"), BALANCE_MAGNITUDE_LIMIT);
        assert_eq!(proj.anomalies(), 1);
    }
}
