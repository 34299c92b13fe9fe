//! [`LedgerCore`]: the assembled credit ledger.
//!
//! Grounded in `toka-kernel`'s `Kernel` struct: one explicitly-constructed
//! object holding every collaborator (journal, bus, projections, schema
//! registry, snapshots), built once by [`LedgerCore::bootstrap`] and passed
//! around by `Arc` rather than reached for through a global. There is no
//! `static` anywhere in this crate.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use ledger_bus::{BusError, EventBus};
use ledger_journal::{AppendOutcome, FileJournal, Journal, JournalError, JournalMetrics, SqlJournal};
use ledger_projections::{
    ApprovalRecord, ApprovalState, CollaborationRecord, LedgerHistoryEntry, ProjectionSet,
};
use ledger_replay::{IntegrityReport, ReplayEngine, ReplayError};
use ledger_snapshot::{FileSnapshotStore, Snapshot, SnapshotError, SnapshotStore, SqlSnapshotStore};
use ledger_types::{
    create_approval_approved, create_approval_expired, create_approval_rejected,
    create_approval_requested, create_collaboration_recorded, create_credit_allocated,
    create_credit_consumed, create_credit_refunded, create_credit_regenerated,
    create_credit_withdrawn, create_eoc_regulated, create_mission_rated, create_reuse_detected,
    EntityType, EnvelopeError, EventContext, SchemaRegistry,
};

use crate::config::{JournalBackend, LedgerConfig};
use crate::projection_updater::ProjectionUpdater;

/// Errors raised from any facade operation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A producer call built an invalid envelope.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// The journal rejected or failed an operation.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// Publishing through the bus failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// A replay pass failed.
    #[error(transparent)]
    Replay(#[from] ReplayError),
    /// A snapshot operation failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Aggregate operational counters across the journal and bus.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CoreMetrics {
    /// Journal-level counters.
    pub journal: JournalMetrics,
    /// Bus-level counters.
    pub bus: ledger_bus::BusMetrics,
}

/// The assembled credit ledger: journal, bus, projections, schema registry
/// and (optionally) snapshots, wired together and ready to accept events.
pub struct LedgerCore {
    journal: Arc<dyn Journal>,
    bus: Arc<EventBus>,
    registry: SchemaRegistry,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    projections: Arc<RwLock<ProjectionSet>>,
    config: LedgerConfig,
    bootstrap_integrity: IntegrityReport,
}

impl LedgerCore {
    /// Build a journal for `config`, recover/initialize it, replay its full
    /// history into a fresh [`ProjectionSet`] (restoring from the latest
    /// snapshot first, if snapshots are enabled and one exists), then wrap
    /// the journal in an [`EventBus`] with the projection updater subscribed
    /// so that every subsequent `publish` keeps projections warm.
    pub async fn bootstrap(config: LedgerConfig) -> Result<Self> {
        // The SQL backend shares one pool between the journal's
        // `credit_events` table and the snapshot store's `credit_snapshots`
        // table, the way `toka-store-sqlite` shares a pool across tables
        // rather than opening a second connection to the same file.
        let (journal, sql_pool): (Arc<dyn Journal>, Option<sqlx::SqlitePool>) =
            match config.journal.backend {
                JournalBackend::File => (
                    Arc::new(FileJournal::new(
                        config.journal.file.path.clone(),
                        config.journal.file.fsync,
                    )),
                    None,
                ),
                JournalBackend::Sql => {
                    let url = format!("sqlite://{}?mode=rwc", config.journal.sql.connection);
                    let pool = sqlx::SqlitePool::connect(&url)
                        .await
                        .map_err(ledger_journal::JournalError::Database)?;
                    let journal = SqlJournal::from_pool(pool.clone(), config.journal.sql.connection.clone());
                    (Arc::new(journal), Some(pool))
                }
            };
        journal.initialize().await?;

        let snapshots: Option<Arc<dyn SnapshotStore>> = if config.snapshot.enabled {
            match &sql_pool {
                Some(pool) => Some(Arc::new(SqlSnapshotStore::new(pool.clone()).await?)),
                None => Some(Arc::new(FileSnapshotStore::new(config.snapshot.dir.clone()))),
            }
        } else {
            None
        };

        let registry = SchemaRegistry::new();
        let engine = ReplayEngine::new(journal.clone(), registry.clone(), snapshots.clone());
        let outcome = engine.replay().await?;

        if config.replay.verify_integrity && outcome.integrity.has_hard_violations() {
            warn!(
                violations = outcome.integrity.violations.len(),
                "journal integrity check found hard violations at bootstrap"
            );
        } else {
            info!(
                events = outcome.last_sequence,
                "ledger core bootstrapped"
            );
        }

        let bus = Arc::new(EventBus::new(journal.clone()));
        let projections = Arc::new(RwLock::new(outcome.projections));
        bus.subscribe(None, Arc::new(ProjectionUpdater::new(projections.clone())))
            .await;

        Ok(Self {
            journal,
            bus,
            registry,
            snapshots,
            projections,
            config,
            bootstrap_integrity: outcome.integrity,
        })
    }

    /// The integrity report produced by the replay pass at [`bootstrap`],
    /// so a caller that wants to treat hard violations found at cold start
    /// as fatal can check it without re-running the (possibly expensive)
    /// pass themselves via [`verify_integrity`](Self::verify_integrity).
    ///
    /// [`bootstrap`]: Self::bootstrap
    pub fn bootstrap_integrity(&self) -> &IntegrityReport {
        &self.bootstrap_integrity
    }

    /// Save the current projection state as a snapshot, pruning to the
    /// configured retention. No-op (returns `Ok(None)`) when snapshots are
    /// disabled.
    pub async fn take_snapshot(&self) -> Result<Option<u64>, CoreError> {
        let Some(store) = &self.snapshots else {
            return Ok(None);
        };
        let sequence = self.journal.count().await?;
        let snapshot = Snapshot {
            sequence,
            created_at: Utc::now(),
            projections: self.projections.read().await.clone(),
        };
        store
            .save_with_retention(&snapshot, self.config.snapshot.retention)
            .await?;
        Ok(Some(sequence))
    }

    /// Re-read the full journal and run the integrity pass against it and
    /// the live projection state. Unlike the pass run at bootstrap, this
    /// reflects every event published since.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, CoreError> {
        let entries = self.journal.read_events(None, true).await?;
        let projections = self.projections.read().await.clone();
        Ok(ledger_replay::verify(&entries, &projections))
    }

    /// Discard live projection state and rebuild it from scratch by
    /// replaying the full journal (restoring from the latest snapshot
    /// first, if one exists). Used to recover from a suspected projection
    /// bug without restarting the process.
    pub async fn rebuild_projections(&self) -> Result<IntegrityReport, CoreError> {
        let engine = ReplayEngine::new(self.journal.clone(), self.registry.clone(), self.snapshots.clone());
        let outcome = engine.replay().await?;
        *self.projections.write().await = outcome.projections;
        Ok(outcome.integrity)
    }

    /// Aggregate journal and bus counters.
    pub async fn metrics(&self) -> Result<CoreMetrics, CoreError> {
        Ok(CoreMetrics {
            journal: self.journal.metrics().await?,
            bus: self.bus.metrics().await,
        })
    }

    // ---- balance ----------------------------------------------------

    /// Current balance for `entity_id`, `0.0` if never credited.
    pub async fn balance(&self, entity_id: &str) -> f64 {
        self.projections.read().await.balance.get(entity_id)
    }

    /// Every known entity balance at this instant.
    pub async fn balance_snapshot(&self) -> std::collections::HashMap<String, f64> {
        self.projections.read().await.balance.snapshot()
    }

    // ---- ledger history ----------------------------------------------

    /// `limit` history entries for `entity_id`, newest first, skipping the
    /// first `offset` matches.
    pub async fn ledger_history(
        &self,
        entity_id: &str,
        offset: usize,
        limit: usize,
    ) -> Vec<LedgerHistoryEntry> {
        self.projections
            .read()
            .await
            .ledger
            .history(entity_id, offset, limit)
    }

    // ---- approvals -----------------------------------------------------

    /// Current lifecycle state of `request_id`, if it has ever been
    /// requested.
    pub async fn approval_state(&self, request_id: &str) -> Option<ApprovalState> {
        self.projections.read().await.approval.state(request_id)
    }

    /// The full record for `request_id`, if it exists.
    pub async fn approval_record(&self, request_id: &str) -> Option<ApprovalRecord> {
        self.projections
            .read()
            .await
            .approval
            .get(request_id)
            .cloned()
    }

    /// Every request still awaiting a decision.
    pub async fn pending_approvals(&self) -> Vec<ApprovalRecord> {
        self.projections
            .read()
            .await
            .approval
            .pending()
            .into_iter()
            .cloned()
            .collect()
    }

    // ---- synergy ---------------------------------------------------

    /// Running contribution total for one agent across every collaboration
    /// it has participated in.
    pub async fn contribution_total(&self, agent_id: &str) -> f64 {
        self.projections.read().await.synergy.contribution_total(agent_id)
    }

    /// Total reuse count recorded for `resource_id`.
    pub async fn reuse_count(&self, resource_id: &str) -> u64 {
        self.projections.read().await.synergy.reuse_count_for(resource_id)
    }

    /// Most recent externality-of-cost score recorded for `entity_id`.
    pub async fn eoc_score(&self, entity_id: &str) -> Option<f64> {
        self.projections.read().await.synergy.eoc_score(entity_id)
    }

    /// Mean rating recorded for `mission_id`, if it has been rated.
    pub async fn mean_mission_rating(&self, mission_id: &str) -> Option<f64> {
        self.projections.read().await.synergy.mean_mission_rating(mission_id)
    }

    /// Total reward distributed to `team_id` across every collaboration it
    /// has participated in.
    pub async fn team_reward(&self, team_id: &str) -> f64 {
        self.projections.read().await.synergy.team_reward(team_id)
    }

    /// The collaboration recorded under `collaboration_id`, if any.
    pub async fn collaboration(&self, collaboration_id: &str) -> Option<CollaborationRecord> {
        self.projections
            .read()
            .await
            .synergy
            .collaboration(collaboration_id)
            .cloned()
    }

    // ---- producers: credit movements ------------------------------------

    /// Allocate `amount` credit to `entity_id`, recording its new balance.
    #[allow(clippy::too_many_arguments)]
    pub async fn allocate_credit(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        amount: f64,
        balance_after: f64,
        reason: &str,
        mission_id: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_credit_allocated(
            entity_id,
            entity_type,
            amount,
            balance_after,
            reason,
            mission_id,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Consume `amount` credit from `entity_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn consume_credit(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        amount: f64,
        balance_after: f64,
        reason: &str,
        mission_id: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_credit_consumed(
            entity_id,
            entity_type,
            amount,
            balance_after,
            reason,
            mission_id,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Refund `amount` credit to `entity_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn refund_credit(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        amount: f64,
        balance_after: f64,
        reason: &str,
        mission_id: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_credit_refunded(
            entity_id,
            entity_type,
            amount,
            balance_after,
            reason,
            mission_id,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Withdraw `amount` credit from `entity_id`. The only movement the
    /// balance projection permits to go negative without an anomaly.
    #[allow(clippy::too_many_arguments)]
    pub async fn withdraw_credit(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        amount: f64,
        balance_after: f64,
        reason: &str,
        mission_id: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_credit_withdrawn(
            entity_id,
            entity_type,
            amount,
            balance_after,
            reason,
            mission_id,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Regenerate `amount` credit for `entity_id` (e.g. a periodic refill).
    #[allow(clippy::too_many_arguments)]
    pub async fn regenerate_credit(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        amount: f64,
        balance_after: f64,
        reason: &str,
        mission_id: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_credit_regenerated(
            entity_id,
            entity_type,
            amount,
            balance_after,
            reason,
            mission_id,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    // ---- producers: approvals --------------------------------------------

    /// Request approval for `action_type` on behalf of `requester_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_approval(
        &self,
        request_id: &str,
        action_type: &str,
        requester_id: &str,
        risk_level: &str,
        justification: &str,
        context: Option<serde_json::Value>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_approval_requested(
            request_id,
            action_type,
            requester_id,
            risk_level,
            justification,
            context,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Approve `request_id`. A second terminal resolution for the same
    /// request is accepted by the journal but recorded only as an anomaly
    /// in the approval projection, never as a state change.
    pub async fn approve_request(
        &self,
        request_id: &str,
        resolved_by: Option<String>,
        reason: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_approval_approved(request_id, resolved_by, reason, ctx, Utc::now())?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Reject `request_id`.
    pub async fn reject_request(
        &self,
        request_id: &str,
        resolved_by: Option<String>,
        reason: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_approval_rejected(request_id, resolved_by, reason, ctx, Utc::now())?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Expire `request_id` without a decision.
    pub async fn expire_request(
        &self,
        request_id: &str,
        reason: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_approval_expired(request_id, reason, ctx, Utc::now())?;
        Ok(self.bus.publish(envelope).await?)
    }

    // ---- producers: synergy ----------------------------------------------

    /// Record a collaboration and its reward distribution.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_collaboration(
        &self,
        collaboration_id: &str,
        team_id: &str,
        agent_ids: Vec<String>,
        mission_id: &str,
        contribution_scores: std::collections::HashMap<String, f64>,
        reward: f64,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_collaboration_recorded(
            collaboration_id,
            team_id,
            agent_ids,
            mission_id,
            contribution_scores,
            reward,
            ctx,
            Utc::now(),
        )?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Record that `resource_id` was reused by `reused_by`.
    pub async fn detect_reuse(
        &self,
        resource_id: &str,
        reused_by: &str,
        reuse_count_delta: u64,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope =
            create_reuse_detected(resource_id, reused_by, reuse_count_delta, ctx, Utc::now())?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Record an externality-of-cost score for `entity_id`.
    pub async fn regulate_eoc(
        &self,
        entity_id: &str,
        eoc_score: f64,
        regime: &str,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_eoc_regulated(entity_id, eoc_score, regime, ctx, Utc::now())?;
        Ok(self.bus.publish(envelope).await?)
    }

    /// Record a rating for `mission_id`.
    pub async fn rate_mission(
        &self,
        mission_id: &str,
        rating: f64,
        rater_id: Option<String>,
        ctx: EventContext,
    ) -> Result<AppendOutcome, CoreError> {
        let envelope = create_mission_rated(mission_id, rating, rater_id, ctx, Utc::now())?;
        Ok(self.bus.publish(envelope).await?)
    }
}
