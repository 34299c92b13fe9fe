#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **ledger-bus** – publish = append to the journal, then fan out to
//! subscribers.
//!
//! Grounded in the original `event_bus.py`: a handler is registered either
//! for one [`EventType`](ledger_types::EventType) or for every event, and
//! `publish` notifies matching handlers in registration order, in-process,
//! logging and continuing past any handler that errors rather than letting
//! one bad subscriber block the rest. This is deliberately not a broadcast
//! channel: handlers run to completion before `publish` returns, so a
//! handler that fails is recorded the same commit cycle it failed in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ledger_journal::{AppendOutcome, Journal, JournalError};
use ledger_types::{EventEnvelope, EventType};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A subscriber notified every time a matching event is published.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one published event at its journal `sequence`. An `Err` is
    /// logged and does not stop other handlers from running, nor does it
    /// affect whether the event itself was accepted by the journal.
    async fn handle(&self, sequence: u64, envelope: &EventEnvelope) -> Result<(), BusError>;
}

/// Errors a bus operation can raise.
#[derive(Debug, Error)]
pub enum BusError {
    /// The underlying journal append failed.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    /// A handler reported a failure. Carried only in logs; `publish` does
    /// not itself return this variant.
    #[error("handler {name} failed: {reason}")]
    HandlerFailed {
        /// The subscription id of the failing handler.
        name: String,
        /// The handler-supplied failure description.
        reason: String,
    },
}

/// Operational counters for the bus.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusMetrics {
    /// Total successful `publish` calls (duplicates excluded).
    pub total_published: u64,
    /// Total events rejected as duplicates by the journal.
    pub total_duplicates: u64,
    /// Total handler invocations that returned an error.
    pub total_subscriber_errors: u64,
    /// Current handler count, per event type.
    pub subscribers_by_type: HashMap<EventType, u64>,
    /// Current handler count for wildcard (all-event) subscriptions.
    pub wildcard_subscribers: u64,
}

struct Subscription {
    id: Uuid,
    handler: Arc<dyn EventHandler>,
}

#[derive(Default)]
struct MetricsInner {
    total_published: u64,
    total_duplicates: u64,
    total_subscriber_errors: u64,
}

/// The event bus: a [`Journal`] plus the handlers subscribed to it.
pub struct EventBus {
    journal: Arc<dyn Journal>,
    by_type: RwLock<HashMap<EventType, Vec<Subscription>>>,
    wildcard: RwLock<Vec<Subscription>>,
    metrics: RwLock<MetricsInner>,
}

impl EventBus {
    /// Wrap `journal` with a bus. The journal must already be initialized.
    pub fn new(journal: Arc<dyn Journal>) -> Self {
        Self {
            journal,
            by_type: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            metrics: RwLock::new(MetricsInner::default()),
        }
    }

    /// Subscribe `handler` to `event_type`, or to every event if `None`.
    /// Returns a subscription id that can later be passed to
    /// [`EventBus::unsubscribe`].
    pub async fn subscribe(
        &self,
        event_type: Option<EventType>,
        handler: Arc<dyn EventHandler>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        match event_type {
            Some(ty) => {
                self.by_type
                    .write()
                    .await
                    .entry(ty)
                    .or_default()
                    .push(Subscription { id, handler });
            }
            None => {
                self.wildcard.write().await.push(Subscription { id, handler });
            }
        }
        id
    }

    /// Remove a previously registered subscription. No-op if `id` is
    /// unknown or has already been removed.
    pub async fn unsubscribe(&self, id: Uuid) {
        let mut by_type = self.by_type.write().await;
        for subs in by_type.values_mut() {
            subs.retain(|s| s.id != id);
        }
        drop(by_type);
        self.wildcard.write().await.retain(|s| s.id != id);
    }

    /// Append `envelope` to the journal and, if it was new, notify every
    /// subscriber registered for its event type plus every wildcard
    /// subscriber, in registration order.
    pub async fn publish(&self, envelope: EventEnvelope) -> Result<AppendOutcome, BusError> {
        let event_type = envelope.event_type();
        let typed_envelope = envelope.clone();
        let outcome = self.journal.append(envelope).await?;

        if outcome.is_duplicate() {
            self.metrics.write().await.total_duplicates += 1;
            debug!(?event_type, "publish skipped notify for duplicate event");
            return Ok(outcome);
        }

        self.metrics.write().await.total_published += 1;

        let typed: Vec<Arc<dyn EventHandler>> = self
            .by_type
            .read()
            .await
            .get(&event_type)
            .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
            .unwrap_or_default();
        let wildcard: Vec<Arc<dyn EventHandler>> = self
            .wildcard
            .read()
            .await
            .iter()
            .map(|s| s.handler.clone())
            .collect();

        let sequence = outcome.entry().sequence;
        for handler in typed.into_iter().chain(wildcard) {
            if let Err(e) = handler.handle(sequence, &typed_envelope).await {
                self.metrics.write().await.total_subscriber_errors += 1;
                warn!(error = %e, ?event_type, "event handler failed");
            }
        }

        Ok(outcome)
    }

    /// Operational counters for this bus.
    pub async fn metrics(&self) -> BusMetrics {
        let inner = self.metrics.read().await;
        let by_type = self.by_type.read().await;
        BusMetrics {
            total_published: inner.total_published,
            total_duplicates: inner.total_duplicates,
            total_subscriber_errors: inner.total_subscriber_errors,
            subscribers_by_type: by_type.iter().map(|(k, v)| (*k, v.len() as u64)).collect(),
            wildcard_subscribers: self.wildcard.read().await.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use ledger_journal::FileJournal;
    use ledger_types::{create_credit_allocated, EntityType, EventContext};
    use std::sync::Mutex as StdMutex;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Recording {
        seen: Arc<StdMutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle(&self, _sequence: u64, envelope: &EventEnvelope) -> Result<(), BusError> {
            self.seen.lock().unwrap().push(envelope.idempotency_key.clone());
            if self.fail {
                return Err(BusError::HandlerFailed {
                    name: "recording".into(),
                    reason: "forced failure".into(),
                });
            }
            Ok(())
        }
    }

    async fn bus() -> (EventBus, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal: Arc<dyn Journal> = Arc::new(FileJournal::new(dir.path().join("j.jsonl"), true));
        journal.initialize().await.unwrap();
        (EventBus::new(journal), dir)
    }

    #[tokio::test]
    async fn publish_notifies_subscribed_handler() {
        let (bus, _dir) = bus().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(
            Some(EventType::CreditAllocated),
            Arc::new(Recording {
                seen: seen.clone(),
                fail: false,
            }),
        )
        .await;

        bus.publish(
            create_credit_allocated(
                "agent-1",
                EntityType::Agent,
                10.0,
                10.0,
                "grant",
                None,
                EventContext::default(),
                now(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.metrics().await.total_published, 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let (bus, _dir) = bus().await;
        let seen_a = Arc::new(StdMutex::new(Vec::new()));
        let seen_b = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(
            Some(EventType::CreditAllocated),
            Arc::new(Recording {
                seen: seen_a.clone(),
                fail: true,
            }),
        )
        .await;
        bus.subscribe(
            Some(EventType::CreditAllocated),
            Arc::new(Recording {
                seen: seen_b.clone(),
                fail: false,
            }),
        )
        .await;

        bus.publish(
            create_credit_allocated(
                "agent-1",
                EntityType::Agent,
                10.0,
                10.0,
                "grant",
                None,
                EventContext::default(),
                now(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
        assert_eq!(bus.metrics().await.total_subscriber_errors, 1);
    }

    #[tokio::test]
    async fn duplicate_publish_skips_notify() {
        let (bus, _dir) = bus().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        bus.subscribe(
            None,
            Arc::new(Recording {
                seen: seen.clone(),
                fail: false,
            }),
        )
        .await;

        let ctx = EventContext {
            idempotency_key: Some("fixed".into()),
            ..Default::default()
        };
        bus.publish(
            create_credit_allocated(
                "agent-1", EntityType::Agent, 10.0, 10.0, "grant", None, ctx.clone(), now(),
            )
            .unwrap(),
        )
        .await
        .unwrap();
        bus.publish(
            create_credit_allocated(
                "agent-1", EntityType::Agent, 10.0, 10.0, "grant", None, ctx, now(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.metrics().await.total_duplicates, 1);
    }
}
