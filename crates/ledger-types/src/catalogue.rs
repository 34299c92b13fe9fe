//! The closed catalogue of credit-ledger events.
//!
//! Every event the ledger core ever appends is one of the variants below.
//! There is no "custom event type" escape hatch: adding a new kind of event
//! means adding a variant here, not passing an opaque map through the
//! journal. This is the direct replacement for the original system's
//! `event_type: str` + `payload: dict` pair.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of event kinds the ledger core understands.
///
/// Serializes to the `SCREAMING_SNAKE_CASE` names used throughout `spec.md`
/// §3.3 (`CREDIT_ALLOCATED`, `APPROVAL_REQUESTED`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Credit granted to an entity.
    CreditAllocated,
    /// Credit spent by an entity.
    CreditConsumed,
    /// Previously consumed credit returned to an entity.
    CreditRefunded,
    /// Credit removed from an entity outside the normal spend path.
    CreditWithdrawn,
    /// Credit replenished by a scheduled or policy-driven regeneration.
    CreditRegenerated,
    /// An approval workflow was opened for a risky action.
    ApprovalRequested,
    /// An approval request was approved.
    ApprovalApproved,
    /// An approval request was rejected.
    ApprovalRejected,
    /// An approval request expired without a decision.
    ApprovalExpired,
    /// Two or more agents recorded a collaborative contribution.
    CollaborationRecorded,
    /// A previously produced resource was reused instead of recreated.
    ReuseDetected,
    /// An entity's externality-of-cost score was recalculated.
    EocRegulated,
    /// A mission outcome was rated.
    MissionRated,
}

impl EventType {
    /// Stable wire name, identical to the `serde` rename used for this
    /// variant. Useful for log lines and metrics labels that need the
    /// catalogue name without going through serialization.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CreditAllocated => "CREDIT_ALLOCATED",
            EventType::CreditConsumed => "CREDIT_CONSUMED",
            EventType::CreditRefunded => "CREDIT_REFUNDED",
            EventType::CreditWithdrawn => "CREDIT_WITHDRAWN",
            EventType::CreditRegenerated => "CREDIT_REGENERATED",
            EventType::ApprovalRequested => "APPROVAL_REQUESTED",
            EventType::ApprovalApproved => "APPROVAL_APPROVED",
            EventType::ApprovalRejected => "APPROVAL_REJECTED",
            EventType::ApprovalExpired => "APPROVAL_EXPIRED",
            EventType::CollaborationRecorded => "COLLABORATION_RECORDED",
            EventType::ReuseDetected => "REUSE_DETECTED",
            EventType::EocRegulated => "EOC_REGULATED",
            EventType::MissionRated => "MISSION_RATED",
        }
    }

    /// All catalogue members, in the fixed order the replay engine and the
    /// approval/ledger/balance projections apply handlers.
    pub const ALL: [EventType; 13] = [
        EventType::CreditAllocated,
        EventType::CreditConsumed,
        EventType::CreditRefunded,
        EventType::CreditWithdrawn,
        EventType::CreditRegenerated,
        EventType::ApprovalRequested,
        EventType::ApprovalApproved,
        EventType::ApprovalRejected,
        EventType::ApprovalExpired,
        EventType::CollaborationRecorded,
        EventType::ReuseDetected,
        EventType::EocRegulated,
        EventType::MissionRated,
    ];
}

/// The kind of entity a credit event applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// An autonomous agent.
    Agent,
    /// A mission (a unit of work spanning one or more agents).
    Mission,
}

/// Payload shared by every `CREDIT_*` event.
///
/// `amount` is always a non-negative magnitude; direction is carried by the
/// [`EventType`], never by the sign of `amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPayload {
    /// Entity the credit movement applies to.
    pub entity_id: String,
    /// Kind of entity.
    pub entity_type: EntityType,
    /// Non-negative magnitude of the movement.
    pub amount: f64,
    /// Entity balance immediately after this event is applied.
    pub balance_after: f64,
    /// Human-readable reason, used for audit and governance review.
    pub reason: String,
    /// Mission this movement is attributed to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<String>,
    /// Free-form metadata. Absent on schema_version 1 payloads; populated by
    /// the `CREDIT_ALLOCATED` v2 upcaster (see [`crate::schema`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Payload for `APPROVAL_REQUESTED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequestedPayload {
    /// Identifier of the approval request, stable across its lifetime.
    pub request_id: String,
    /// The action awaiting approval.
    pub action_type: String,
    /// Entity that requested the action.
    pub requester_id: String,
    /// Caller-assigned risk classification, e.g. `"low"`, `"high"`.
    pub risk_level: String,
    /// Why the action was flagged for approval.
    pub justification: String,
    /// Opaque action context, preserved verbatim for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Payload shared by `APPROVAL_APPROVED` / `APPROVAL_REJECTED` / `APPROVAL_EXPIRED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResolutionPayload {
    /// The request this resolution applies to.
    pub request_id: String,
    /// Who resolved the request (absent for an automatic expiry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// Free-text resolution reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `COLLABORATION_RECORDED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationRecordedPayload {
    /// Identifier for this collaboration instance.
    pub collaboration_id: String,
    /// Team the collaborating agents belong to.
    pub team_id: String,
    /// Agents that participated.
    pub agent_ids: Vec<String>,
    /// Mission the collaboration contributed to.
    pub mission_id: String,
    /// Per-agent contribution score, summing to at most 1.0.
    pub contribution_scores: HashMap<String, f64>,
    /// Total credit reward distributed across participants.
    pub reward: f64,
}

/// Payload for `REUSE_DETECTED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReuseDetectedPayload {
    /// The resource that was reused instead of recreated.
    pub resource_id: String,
    /// Entity that performed the reuse.
    pub reused_by: String,
    /// How many additional times the resource was reused by this event.
    pub reuse_count_delta: u64,
}

/// Payload for `EOC_REGULATED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EocRegulatedPayload {
    /// Entity whose externality-of-cost score changed.
    pub entity_id: String,
    /// The recalculated score.
    pub eoc_score: f64,
    /// The governance regime this score places the entity in.
    pub regime: String,
}

/// Payload for `MISSION_RATED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRatedPayload {
    /// Mission being rated.
    pub mission_id: String,
    /// Rating value.
    pub rating: f64,
    /// Who issued the rating, if attributable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rater_id: Option<String>,
}

/// The sum type over every payload shape in the catalogue.
///
/// `event_type()` derives the envelope's [`EventType`] from the variant, so
/// the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// See [`EventType::CreditAllocated`].
    CreditAllocated(LedgerPayload),
    /// See [`EventType::CreditConsumed`].
    CreditConsumed(LedgerPayload),
    /// See [`EventType::CreditRefunded`].
    CreditRefunded(LedgerPayload),
    /// See [`EventType::CreditWithdrawn`].
    CreditWithdrawn(LedgerPayload),
    /// See [`EventType::CreditRegenerated`].
    CreditRegenerated(LedgerPayload),
    /// See [`EventType::ApprovalRequested`].
    ApprovalRequested(ApprovalRequestedPayload),
    /// See [`EventType::ApprovalApproved`].
    ApprovalApproved(ApprovalResolutionPayload),
    /// See [`EventType::ApprovalRejected`].
    ApprovalRejected(ApprovalResolutionPayload),
    /// See [`EventType::ApprovalExpired`].
    ApprovalExpired(ApprovalResolutionPayload),
    /// See [`EventType::CollaborationRecorded`].
    CollaborationRecorded(CollaborationRecordedPayload),
    /// See [`EventType::ReuseDetected`].
    ReuseDetected(ReuseDetectedPayload),
    /// See [`EventType::EocRegulated`].
    EocRegulated(EocRegulatedPayload),
    /// See [`EventType::MissionRated`].
    MissionRated(MissionRatedPayload),
}

impl EventPayload {
    /// The [`EventType`] this payload variant corresponds to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::CreditAllocated(_) => EventType::CreditAllocated,
            EventPayload::CreditConsumed(_) => EventType::CreditConsumed,
            EventPayload::CreditRefunded(_) => EventType::CreditRefunded,
            EventPayload::CreditWithdrawn(_) => EventType::CreditWithdrawn,
            EventPayload::CreditRegenerated(_) => EventType::CreditRegenerated,
            EventPayload::ApprovalRequested(_) => EventType::ApprovalRequested,
            EventPayload::ApprovalApproved(_) => EventType::ApprovalApproved,
            EventPayload::ApprovalRejected(_) => EventType::ApprovalRejected,
            EventPayload::ApprovalExpired(_) => EventType::ApprovalExpired,
            EventPayload::CollaborationRecorded(_) => EventType::CollaborationRecorded,
            EventPayload::ReuseDetected(_) => EventType::ReuseDetected,
            EventPayload::EocRegulated(_) => EventType::EocRegulated,
            EventPayload::MissionRated(_) => EventType::MissionRated,
        }
    }

    /// The ledger delta payload, if this is one of the `CREDIT_*` variants.
    pub fn as_ledger_payload(&self) -> Option<&LedgerPayload> {
        match self {
            EventPayload::CreditAllocated(p)
            | EventPayload::CreditConsumed(p)
            | EventPayload::CreditRefunded(p)
            | EventPayload::CreditWithdrawn(p)
            | EventPayload::CreditRegenerated(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_json() {
        for ty in EventType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            let back: EventType = serde_json::from_str(&json).unwrap();
            assert_eq!(ty, back);
            assert_eq!(json.trim_matches('"'), ty.as_str());
        }
    }

    #[test]
    fn payload_event_type_matches_variant() {
        let payload = EventPayload::CreditConsumed(LedgerPayload {
            entity_id: "agent-1".into(),
            entity_type: EntityType::Agent,
            amount: 10.0,
            balance_after: 90.0,
            reason: "test".into(),
            mission_id: None,
            metadata: None,
        });
        assert_eq!(payload.event_type(), EventType::CreditConsumed);
        assert!(payload.as_ledger_payload().is_some());
    }
}
