//! The internal subscriber that keeps live projection state current.
//!
//! Grounded in the original `integration_demo.py::CreditSystemDemo`:
//! projections are not rebuilt per read, they are kept warm by subscribing
//! to every event the bus publishes and folding it in as it arrives.
//! [`ReplayEngine`](ledger_replay::ReplayEngine) is only needed again at
//! cold start or after a crash.

use std::sync::Arc;

use async_trait::async_trait;
use ledger_bus::{BusError, EventHandler};
use ledger_types::EventEnvelope;
use tokio::sync::RwLock;

use ledger_projections::ProjectionSet;

/// Folds every published event into a shared [`ProjectionSet`].
pub struct ProjectionUpdater {
    projections: Arc<RwLock<ProjectionSet>>,
}

impl ProjectionUpdater {
    /// Wrap `projections`, folding every event the bus publishes into it.
    pub fn new(projections: Arc<RwLock<ProjectionSet>>) -> Self {
        Self { projections }
    }
}

#[async_trait]
impl EventHandler for ProjectionUpdater {
    async fn handle(&self, sequence: u64, envelope: &EventEnvelope) -> Result<(), BusError> {
        self.projections
            .write()
            .await
            .apply(sequence, envelope.timestamp, envelope);
        Ok(())
    }
}
