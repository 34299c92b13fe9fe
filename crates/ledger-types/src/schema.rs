//! Schema evolution: per-event-type version registries and the upcasters
//! that promote an older payload shape to the latest one.
//!
//! Grounded in the original `schema_versions.py::SchemaRegistry`: versions
//! for a given event type must be registered contiguously starting at 1,
//! version 1 must not carry an upcaster (there is nothing to upcast from),
//! and every version after it must. Registering version 3 before version 2
//! is rejected as a gap, not silently accepted.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::catalogue::EventType;
use crate::envelope::{EventEnvelope, RawEnvelope};

/// A pure, total, deterministic function that promotes a payload from
/// version `v` to `v + 1`. Operates on the flat JSON payload object, not
/// the whole envelope.
pub type Upcaster = Arc<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>;

/// One registered schema version for a single event type.
#[derive(Clone)]
struct VersionEntry {
    /// Upcaster from this version to the next one. `None` only for version 1.
    upcaster: Option<Upcaster>,
    /// Short description, surfaced via [`SchemaRegistry::version_history`].
    description: &'static str,
}

/// Errors raised while registering or applying schema versions.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Versions for an event type must be registered 1, 2, 3, ... with no
    /// gaps.
    #[error("schema version gap for {event_type:?}: expected {expected}, got {got}")]
    SchemaVersionGap {
        /// The event type being registered.
        event_type: EventType,
        /// The version number that should have been registered next.
        expected: u32,
        /// The version number that was actually registered.
        got: u32,
    },
    /// Version 1 is the payload's original shape; it has nothing to upcast
    /// from and must not carry an upcaster function.
    #[error("version 1 of {0:?} must not register an upcaster")]
    FirstVersionHasUpcaster(EventType),
    /// Every version after 1 promotes the previous shape and must carry one.
    #[error("version {1} of {0:?} must register an upcaster")]
    MissingUpcaster(EventType, u32),
    /// An envelope referenced a schema version never registered for its
    /// event type.
    #[error("{0:?} has no registered schema version {1}")]
    UnknownVersion(EventType, u32),
    /// An envelope's schema_version is ahead of anything registered, which
    /// can only mean the reader is older than the writer.
    #[error("{event_type:?} schema_version {got} is newer than the latest known version {latest}")]
    FutureVersion {
        /// The event type being read.
        event_type: EventType,
        /// The version stamped on the envelope.
        got: u32,
        /// The newest version this registry knows about.
        latest: u32,
    },
    /// The upcast payload failed to deserialize into the latest typed shape.
    #[error("failed to decode upcast payload for {0:?}: {1}")]
    DecodeFailed(EventType, serde_json::Error),
}

/// One entry in a schema's version history, for diagnostics.
#[derive(Debug, Clone)]
pub struct VersionHistoryEntry {
    /// The version number.
    pub version: u32,
    /// Whether this version carries an upcaster from the previous one.
    pub has_upcaster: bool,
    /// The description passed at registration time.
    pub description: &'static str,
}

/// Registry of schema versions for every event type, and the upcast path
/// between them.
///
/// Versions not explicitly registered default to a single version (1, no
/// upcaster) the first time they're looked up, matching the original
/// system's behavior of treating an unregistered type as always current.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    versions: HashMap<EventType, Vec<VersionEntry>>,
}

impl SchemaRegistry {
    /// An empty registry; every event type starts at schema version 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next schema version for `event_type`.
    ///
    /// `version` must equal one more than the highest version already
    /// registered for this type (or be `1` if none are registered yet).
    /// `upcaster` must be `None` exactly when `version == 1`.
    pub fn register_version(
        &mut self,
        event_type: EventType,
        version: u32,
        upcaster: Option<Upcaster>,
        description: &'static str,
    ) -> Result<(), SchemaError> {
        let entries = self.versions.entry(event_type).or_default();
        let expected = entries.len() as u32 + 1;
        if version != expected {
            return Err(SchemaError::SchemaVersionGap {
                event_type,
                expected,
                got: version,
            });
        }
        if version == 1 && upcaster.is_some() {
            return Err(SchemaError::FirstVersionHasUpcaster(event_type));
        }
        if version > 1 && upcaster.is_none() {
            return Err(SchemaError::MissingUpcaster(event_type, version));
        }
        entries.push(VersionEntry {
            upcaster,
            description,
        });
        Ok(())
    }

    /// The latest registered version for `event_type`, or `1` if none have
    /// been registered.
    pub fn latest_version(&self, event_type: EventType) -> u32 {
        self.versions
            .get(&event_type)
            .map(|v| v.len() as u32)
            .unwrap_or(1)
    }

    /// The chain of versions this type has gone through, oldest first.
    pub fn version_history(&self, event_type: EventType) -> Vec<VersionHistoryEntry> {
        match self.versions.get(&event_type) {
            Some(entries) => entries
                .iter()
                .enumerate()
                .map(|(idx, e)| VersionHistoryEntry {
                    version: idx as u32 + 1,
                    has_upcaster: e.upcaster.is_some(),
                    description: e.description,
                })
                .collect(),
            None => vec![VersionHistoryEntry {
                version: 1,
                has_upcaster: false,
                description: "unregistered type, implicitly version 1",
            }],
        }
    }

    /// Promote `raw` to the latest known schema version for its event
    /// type, then decode the result into a fully-typed [`EventEnvelope`].
    pub fn upcast(&self, mut raw: RawEnvelope) -> Result<EventEnvelope, SchemaError> {
        let event_type = raw.event_type;
        let latest = self.latest_version(event_type);
        if raw.schema_version > latest {
            return Err(SchemaError::FutureVersion {
                event_type,
                got: raw.schema_version,
                latest,
            });
        }
        if raw.schema_version == 0 {
            return Err(SchemaError::UnknownVersion(event_type, 0));
        }

        let entries = self.versions.get(&event_type);
        let mut version = raw.schema_version;
        while version < latest {
            let upcaster = entries
                .and_then(|e| e.get((version - 1) as usize))
                .and_then(|e| e.upcaster.clone())
                .ok_or(SchemaError::UnknownVersion(event_type, version))?;
            raw.payload = upcaster(raw.payload);
            version += 1;
        }

        let tagged = serde_json::json!({ event_type_variant_name(event_type): raw.payload });
        let payload = serde_json::from_value(tagged)
            .map_err(|e| SchemaError::DecodeFailed(event_type, e))?;

        Ok(EventEnvelope {
            event_id: raw.event_id,
            idempotency_key: raw.idempotency_key,
            schema_version: latest,
            timestamp: raw.timestamp,
            actor_id: raw.actor_id,
            correlation_id: raw.correlation_id,
            causation_id: raw.causation_id,
            payload,
        })
    }
}

/// `EventPayload`'s `serde(rename_all = "SCREAMING_SNAKE_CASE")` tag name
/// for each variant, needed to reconstruct the tagged JSON form an upcast
/// payload decodes from.
fn event_type_variant_name(event_type: EventType) -> &'static str {
    event_type.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::EntityType;
    use crate::envelope::{create_credit_allocated, EventContext};
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn rejects_version_gap() {
        let mut reg = SchemaRegistry::new();
        let err = reg
            .register_version(EventType::CreditAllocated, 2, None, "bad")
            .unwrap_err();
        assert!(matches!(err, SchemaError::SchemaVersionGap { expected: 1, got: 2, .. }));
    }

    #[test]
    fn rejects_v1_with_upcaster() {
        let mut reg = SchemaRegistry::new();
        let upcaster: Upcaster = Arc::new(|v| v);
        let err = reg
            .register_version(EventType::CreditAllocated, 1, Some(upcaster), "bad")
            .unwrap_err();
        assert!(matches!(err, SchemaError::FirstVersionHasUpcaster(_)));
    }

    #[test]
    fn rejects_v2_without_upcaster() {
        let mut reg = SchemaRegistry::new();
        reg.register_version(EventType::CreditAllocated, 1, None, "initial")
            .unwrap();
        let err = reg
            .register_version(EventType::CreditAllocated, 2, None, "bad")
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingUpcaster(_, 2)));
    }

    #[test]
    fn upcast_injects_default_metadata() {
        let mut reg = SchemaRegistry::new();
        reg.register_version(EventType::CreditAllocated, 1, None, "initial")
            .unwrap();
        let upcaster: Upcaster = Arc::new(|mut v| {
            if let Some(obj) = v.as_object_mut() {
                obj.entry("metadata")
                    .or_insert_with(|| serde_json::json!({"source": "system"}));
            }
            v
        });
        reg.register_version(
            EventType::CreditAllocated,
            2,
            Some(upcaster),
            "adds metadata field",
        )
        .unwrap();

        let env = create_credit_allocated(
            "agent-1",
            EntityType::Agent,
            10.0,
            10.0,
            "grant",
            None,
            EventContext::default(),
            now(),
        )
        .unwrap();
        assert_eq!(env.schema_version, 1);

        let raw = RawEnvelope::from(&env);
        let upcast = reg.upcast(raw).unwrap();
        assert_eq!(upcast.schema_version, 2);
        let payload = upcast.payload.as_ledger_payload().unwrap();
        assert_eq!(
            payload.metadata.as_ref().unwrap().get("source").unwrap(),
            "system"
        );
    }

    #[test]
    fn future_version_is_rejected() {
        let reg = SchemaRegistry::new();
        let raw = RawEnvelope {
            event_id: uuid::Uuid::new_v4(),
            idempotency_key: "k".into(),
            event_type: EventType::CreditAllocated,
            schema_version: 5,
            timestamp: now(),
            actor_id: None,
            correlation_id: None,
            causation_id: None,
            payload: serde_json::json!({}),
        };
        let err = reg.upcast(raw).unwrap_err();
        assert!(matches!(err, SchemaError::FutureVersion { got: 5, latest: 1, .. }));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::catalogue::EntityType;
    use crate::envelope::{create_credit_allocated, EventContext};
    use proptest::prelude::*;

    fn now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    // Builds a registry with `chain_len` versions for `CREDIT_ALLOCATED`,
    // each upcaster stamping a distinct marker field so the version a raw
    // payload entered at is visible in the fully-upcast result.
    fn registry_with_chain(chain_len: u32) -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.register_version(EventType::CreditAllocated, 1, None, "v1")
            .unwrap();
        for version in 2..=chain_len {
            let upcaster: Upcaster = Arc::new(move |mut v| {
                if let Some(obj) = v.as_object_mut() {
                    obj.insert("metadata".to_string(), serde_json::json!({"upcast_to": version}));
                }
                v
            });
            reg.register_version(EventType::CreditAllocated, version, Some(upcaster), "chain")
                .unwrap();
        }
        reg
    }

    proptest! {
        // P5 (determinism, restricted to one registry/input pair): upcasting
        // the same raw envelope twice always produces byte-identical results,
        // and always converges on the registry's latest version regardless
        // of which historical version it started at.
        #[test]
        fn upcast_is_deterministic_and_converges_to_latest(
            chain_len in 1u32..8,
            start_version in 1u32..8,
        ) {
            prop_assume!(start_version <= chain_len);
            let reg = registry_with_chain(chain_len);

            let env = create_credit_allocated(
                "agent-1",
                EntityType::Agent,
                10.0,
                10.0,
                "grant",
                None,
                EventContext::default(),
                now(),
            )
            .unwrap();
            let mut raw = RawEnvelope::from(&env);
            raw.schema_version = start_version;

            let first = reg.upcast(raw.clone()).unwrap();
            let second = reg.upcast(raw).unwrap();

            prop_assert_eq!(first.schema_version, chain_len);
            prop_assert_eq!(second.schema_version, chain_len);
            prop_assert_eq!(
                serde_json::to_string(&first.payload).unwrap(),
                serde_json::to_string(&second.payload).unwrap()
            );
        }

        // Registering versions out of order (anything but the next
        // contiguous integer) is always rejected as a gap.
        #[test]
        fn non_contiguous_registration_always_gap_errors(bogus_version in 2u32..20) {
            let mut reg = SchemaRegistry::new();
            let err = reg
                .register_version(EventType::CreditAllocated, bogus_version, None, "bad")
                .unwrap_err();
            prop_assert!(matches!(err, SchemaError::SchemaVersionGap { expected: 1, .. }));
        }
    }
}
