//! The event envelope and its constructors.
//!
//! Producers never build an [`EventEnvelope`] by hand; they call one of the
//! `create_*` functions below, which validate their inputs and derive a
//! default `idempotency_key` when the caller doesn't supply one. This keeps
//! the envelope and its payload variant from ever disagreeing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::catalogue::{
    ApprovalRequestedPayload, ApprovalResolutionPayload, CollaborationRecordedPayload,
    EntityType, EocRegulatedPayload, EventPayload, EventType, LedgerPayload, MissionRatedPayload,
    ReuseDetectedPayload,
};

/// Longest idempotency key the journal will accept.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Errors raised while constructing an [`EventEnvelope`].
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    /// A credit amount was negative, NaN or infinite.
    #[error("amount must be a finite, non-negative number, got {0}")]
    InvalidAmount(f64),
    /// The caller-supplied or derived idempotency key exceeded the limit.
    #[error("idempotency_key is {0} bytes, limit is {MAX_IDEMPOTENCY_KEY_LEN}")]
    IdempotencyKeyTooLong(usize),
    /// A required identifier field was empty.
    #[error("field {0} must not be empty")]
    EmptyField(&'static str),
}

/// An immutable, fully-typed ledger event, ready to be appended to a journal.
///
/// `event_type` is never stored directly: call [`EventEnvelope::event_type`]
/// to read it off the payload variant, so the two can never drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique identifier for this event.
    pub event_id: Uuid,
    /// Deduplication key. Two envelopes with the same key are the same
    /// logical event; a journal must accept the first and reject the rest.
    pub idempotency_key: String,
    /// Payload schema version this envelope was constructed at.
    pub schema_version: u32,
    /// Wall-clock time the event was created.
    pub timestamp: DateTime<Utc>,
    /// Entity that caused this event, if attributable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    /// Correlates this event with others from the same business operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The event that directly caused this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// The typed payload.
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// The event kind, derived from the payload variant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// A loosely-typed view of an envelope used while reading from a journal,
/// before schema upcasting has resolved the payload to its latest shape.
///
/// Journals deserialize into this type first; [`crate::schema::SchemaRegistry::upcast`]
/// turns it into a fully-typed [`EventEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    /// See [`EventEnvelope::event_id`].
    pub event_id: Uuid,
    /// See [`EventEnvelope::idempotency_key`].
    pub idempotency_key: String,
    /// The event kind, stored explicitly since the payload is still opaque.
    pub event_type: EventType,
    /// The schema version the payload was written at.
    pub schema_version: u32,
    /// See [`EventEnvelope::timestamp`].
    pub timestamp: DateTime<Utc>,
    /// See [`EventEnvelope::actor_id`].
    #[serde(default)]
    pub actor_id: Option<String>,
    /// See [`EventEnvelope::correlation_id`].
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// See [`EventEnvelope::causation_id`].
    #[serde(default)]
    pub causation_id: Option<String>,
    /// The payload, not yet upcast or strongly typed.
    pub payload: serde_json::Value,
}

impl From<&EventEnvelope> for RawEnvelope {
    fn from(env: &EventEnvelope) -> Self {
        let event_type = env.event_type();
        // `EventPayload` serializes as `{ "<Variant>": { ...fields } }`; the
        // raw form wants the bare fields so later upcasters only ever deal
        // in flat payload maps.
        let tagged = serde_json::to_value(&env.payload).expect("payload is always serializable");
        let payload = tagged
            .as_object()
            .and_then(|m| m.values().next())
            .cloned()
            .unwrap_or(tagged);
        RawEnvelope {
            event_id: env.event_id,
            idempotency_key: env.idempotency_key.clone(),
            event_type,
            schema_version: env.schema_version,
            timestamp: env.timestamp,
            actor_id: env.actor_id.clone(),
            correlation_id: env.correlation_id.clone(),
            causation_id: env.causation_id.clone(),
            payload,
        }
    }
}

fn validate_amount(amount: f64) -> Result<(), EnvelopeError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(EnvelopeError::InvalidAmount(amount));
    }
    Ok(())
}

fn validate_non_empty(field: &'static str, value: &str) -> Result<(), EnvelopeError> {
    if value.trim().is_empty() {
        return Err(EnvelopeError::EmptyField(field));
    }
    Ok(())
}

fn resolve_idempotency_key(
    supplied: Option<String>,
    default_parts: &[&str],
) -> Result<String, EnvelopeError> {
    let key = supplied.unwrap_or_else(|| default_parts.join(":"));
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(EnvelopeError::IdempotencyKeyTooLong(key.len()));
    }
    Ok(key)
}

/// Shared, optional "who/why" metadata every producer may attach.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    /// See [`EventEnvelope::actor_id`].
    pub actor_id: Option<String>,
    /// See [`EventEnvelope::correlation_id`].
    pub correlation_id: Option<String>,
    /// See [`EventEnvelope::causation_id`].
    pub causation_id: Option<String>,
    /// Caller-supplied idempotency key. When absent a deterministic default
    /// is derived from the event's business fields.
    pub idempotency_key: Option<String>,
}

fn build_envelope(
    payload: EventPayload,
    idempotency_key: String,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> EventEnvelope {
    EventEnvelope {
        event_id: Uuid::new_v4(),
        idempotency_key,
        schema_version: 1,
        timestamp: now,
        actor_id: ctx.actor_id,
        correlation_id: ctx.correlation_id,
        causation_id: ctx.causation_id,
        payload,
    }
}

#[allow(clippy::too_many_arguments)]
fn credit_envelope(
    event_type: EventType,
    entity_id: &str,
    entity_type: EntityType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    mission_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("entity_id", entity_id)?;
    validate_non_empty("reason", reason)?;
    validate_amount(amount)?;
    if !balance_after.is_finite() {
        return Err(EnvelopeError::InvalidAmount(balance_after));
    }

    let idempotency_key = resolve_idempotency_key(
        ctx.idempotency_key.clone(),
        &[
            event_type.as_str(),
            entity_id,
            mission_id.as_deref().unwrap_or("-"),
            &format!("{amount}"),
        ],
    )?;

    let payload = LedgerPayload {
        entity_id: entity_id.to_string(),
        entity_type,
        amount,
        balance_after,
        reason: reason.to_string(),
        mission_id,
        metadata: None,
    };
    let variant = match event_type {
        EventType::CreditAllocated => EventPayload::CreditAllocated(payload),
        EventType::CreditConsumed => EventPayload::CreditConsumed(payload),
        EventType::CreditRefunded => EventPayload::CreditRefunded(payload),
        EventType::CreditWithdrawn => EventPayload::CreditWithdrawn(payload),
        EventType::CreditRegenerated => EventPayload::CreditRegenerated(payload),
        other => unreachable!("credit_envelope called with non-credit event type {other:?}"),
    };
    Ok(build_envelope(variant, idempotency_key, ctx, now))
}

/// Build a `CREDIT_ALLOCATED` envelope.
#[allow(clippy::too_many_arguments)]
pub fn create_credit_allocated(
    entity_id: &str,
    entity_type: EntityType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    mission_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    credit_envelope(
        EventType::CreditAllocated,
        entity_id,
        entity_type,
        amount,
        balance_after,
        reason,
        mission_id,
        ctx,
        now,
    )
}

/// Build a `CREDIT_CONSUMED` envelope.
#[allow(clippy::too_many_arguments)]
pub fn create_credit_consumed(
    entity_id: &str,
    entity_type: EntityType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    mission_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    credit_envelope(
        EventType::CreditConsumed,
        entity_id,
        entity_type,
        amount,
        balance_after,
        reason,
        mission_id,
        ctx,
        now,
    )
}

/// Build a `CREDIT_REFUNDED` envelope.
#[allow(clippy::too_many_arguments)]
pub fn create_credit_refunded(
    entity_id: &str,
    entity_type: EntityType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    mission_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    credit_envelope(
        EventType::CreditRefunded,
        entity_id,
        entity_type,
        amount,
        balance_after,
        reason,
        mission_id,
        ctx,
        now,
    )
}

/// Build a `CREDIT_WITHDRAWN` envelope. This is the only event type the
/// balance projection permits to drive a balance negative.
#[allow(clippy::too_many_arguments)]
pub fn create_credit_withdrawn(
    entity_id: &str,
    entity_type: EntityType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    mission_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    credit_envelope(
        EventType::CreditWithdrawn,
        entity_id,
        entity_type,
        amount,
        balance_after,
        reason,
        mission_id,
        ctx,
        now,
    )
}

/// Build a `CREDIT_REGENERATED` envelope.
#[allow(clippy::too_many_arguments)]
pub fn create_credit_regenerated(
    entity_id: &str,
    entity_type: EntityType,
    amount: f64,
    balance_after: f64,
    reason: &str,
    mission_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    credit_envelope(
        EventType::CreditRegenerated,
        entity_id,
        entity_type,
        amount,
        balance_after,
        reason,
        mission_id,
        ctx,
        now,
    )
}

/// Build an `APPROVAL_REQUESTED` envelope.
pub fn create_approval_requested(
    request_id: &str,
    action_type: &str,
    requester_id: &str,
    risk_level: &str,
    justification: &str,
    context: Option<serde_json::Value>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("request_id", request_id)?;
    validate_non_empty("action_type", action_type)?;
    validate_non_empty("requester_id", requester_id)?;

    let idempotency_key =
        resolve_idempotency_key(ctx.idempotency_key.clone(), &["APPROVAL_REQUESTED", request_id])?;
    let payload = EventPayload::ApprovalRequested(ApprovalRequestedPayload {
        request_id: request_id.to_string(),
        action_type: action_type.to_string(),
        requester_id: requester_id.to_string(),
        risk_level: risk_level.to_string(),
        justification: justification.to_string(),
        context,
    });
    Ok(build_envelope(payload, idempotency_key, ctx, now))
}

fn approval_resolution(
    event_type: EventType,
    request_id: &str,
    resolved_by: Option<String>,
    reason: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("request_id", request_id)?;
    let idempotency_key =
        resolve_idempotency_key(ctx.idempotency_key.clone(), &[event_type.as_str(), request_id])?;
    let resolution = ApprovalResolutionPayload {
        request_id: request_id.to_string(),
        resolved_by,
        reason,
    };
    let payload = match event_type {
        EventType::ApprovalApproved => EventPayload::ApprovalApproved(resolution),
        EventType::ApprovalRejected => EventPayload::ApprovalRejected(resolution),
        EventType::ApprovalExpired => EventPayload::ApprovalExpired(resolution),
        other => unreachable!("approval_resolution called with {other:?}"),
    };
    Ok(build_envelope(payload, idempotency_key, ctx, now))
}

/// Build an `APPROVAL_APPROVED` envelope.
pub fn create_approval_approved(
    request_id: &str,
    resolved_by: Option<String>,
    reason: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    approval_resolution(
        EventType::ApprovalApproved,
        request_id,
        resolved_by,
        reason,
        ctx,
        now,
    )
}

/// Build an `APPROVAL_REJECTED` envelope.
pub fn create_approval_rejected(
    request_id: &str,
    resolved_by: Option<String>,
    reason: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    approval_resolution(
        EventType::ApprovalRejected,
        request_id,
        resolved_by,
        reason,
        ctx,
        now,
    )
}

/// Build an `APPROVAL_EXPIRED` envelope.
pub fn create_approval_expired(
    request_id: &str,
    reason: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    approval_resolution(EventType::ApprovalExpired, request_id, None, reason, ctx, now)
}

/// Build a `COLLABORATION_RECORDED` envelope.
#[allow(clippy::too_many_arguments)]
pub fn create_collaboration_recorded(
    collaboration_id: &str,
    team_id: &str,
    agent_ids: Vec<String>,
    mission_id: &str,
    contribution_scores: std::collections::HashMap<String, f64>,
    reward: f64,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("collaboration_id", collaboration_id)?;
    validate_non_empty("mission_id", mission_id)?;
    validate_amount(reward)?;
    if agent_ids.is_empty() {
        return Err(EnvelopeError::EmptyField("agent_ids"));
    }

    let idempotency_key = resolve_idempotency_key(
        ctx.idempotency_key.clone(),
        &["COLLABORATION_RECORDED", collaboration_id],
    )?;
    let payload = EventPayload::CollaborationRecorded(CollaborationRecordedPayload {
        collaboration_id: collaboration_id.to_string(),
        team_id: team_id.to_string(),
        agent_ids,
        mission_id: mission_id.to_string(),
        contribution_scores,
        reward,
    });
    Ok(build_envelope(payload, idempotency_key, ctx, now))
}

/// Build a `REUSE_DETECTED` envelope.
pub fn create_reuse_detected(
    resource_id: &str,
    reused_by: &str,
    reuse_count_delta: u64,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("resource_id", resource_id)?;
    validate_non_empty("reused_by", reused_by)?;

    let idempotency_key = resolve_idempotency_key(
        ctx.idempotency_key.clone(),
        &[
            "REUSE_DETECTED",
            resource_id,
            reused_by,
            &reuse_count_delta.to_string(),
        ],
    )?;
    let payload = EventPayload::ReuseDetected(ReuseDetectedPayload {
        resource_id: resource_id.to_string(),
        reused_by: reused_by.to_string(),
        reuse_count_delta,
    });
    Ok(build_envelope(payload, idempotency_key, ctx, now))
}

/// Build an `EOC_REGULATED` envelope.
pub fn create_eoc_regulated(
    entity_id: &str,
    eoc_score: f64,
    regime: &str,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("entity_id", entity_id)?;
    validate_non_empty("regime", regime)?;
    if !eoc_score.is_finite() {
        return Err(EnvelopeError::InvalidAmount(eoc_score));
    }

    let idempotency_key = resolve_idempotency_key(
        ctx.idempotency_key.clone(),
        &["EOC_REGULATED", entity_id, &format!("{eoc_score}")],
    )?;
    let payload = EventPayload::EocRegulated(EocRegulatedPayload {
        entity_id: entity_id.to_string(),
        eoc_score,
        regime: regime.to_string(),
    });
    Ok(build_envelope(payload, idempotency_key, ctx, now))
}

/// Build a `MISSION_RATED` envelope.
pub fn create_mission_rated(
    mission_id: &str,
    rating: f64,
    rater_id: Option<String>,
    ctx: EventContext,
    now: DateTime<Utc>,
) -> Result<EventEnvelope, EnvelopeError> {
    validate_non_empty("mission_id", mission_id)?;
    if !rating.is_finite() {
        return Err(EnvelopeError::InvalidAmount(rating));
    }

    let idempotency_key = resolve_idempotency_key(
        ctx.idempotency_key.clone(),
        &["MISSION_RATED", mission_id, &format!("{rating}")],
    )?;
    let payload = EventPayload::MissionRated(MissionRatedPayload {
        mission_id: mission_id.to_string(),
        rating,
        rater_id,
    });
    Ok(build_envelope(payload, idempotency_key, ctx, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn default_idempotency_key_is_deterministic() {
        let a = create_credit_allocated(
            "agent-1",
            EntityType::Agent,
            50.0,
            50.0,
            "grant",
            None,
            EventContext::default(),
            now(),
        )
        .unwrap();
        let b = create_credit_allocated(
            "agent-1",
            EntityType::Agent,
            50.0,
            50.0,
            "grant",
            None,
            EventContext::default(),
            now(),
        )
        .unwrap();
        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn rejects_negative_amount() {
        let err = create_credit_consumed(
            "agent-1",
            EntityType::Agent,
            -5.0,
            45.0,
            "spend",
            None,
            EventContext::default(),
            now(),
        )
        .unwrap_err();
        assert_eq!(err, EnvelopeError::InvalidAmount(-5.0));
    }

    #[test]
    fn caller_supplied_idempotency_key_wins() {
        let env = create_credit_consumed(
            "agent-1",
            EntityType::Agent,
            5.0,
            45.0,
            "spend",
            None,
            EventContext {
                idempotency_key: Some("consume:mission-7:attempt-1".into()),
                ..Default::default()
            },
            now(),
        )
        .unwrap();
        assert_eq!(env.idempotency_key, "consume:mission-7:attempt-1");
    }

    #[test]
    fn raw_envelope_round_trips_payload_fields() {
        let env = create_mission_rated("mission-1", 0.8, None, EventContext::default(), now())
            .unwrap();
        let raw = RawEnvelope::from(&env);
        assert_eq!(raw.event_type, EventType::MissionRated);
        assert_eq!(raw.payload["mission_id"], "mission-1");
    }
}
