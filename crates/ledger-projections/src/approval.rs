//! Approval request state machine.
//!
//! Grounded in the original `projections.py::ApprovalRequest` dataclass.
//! A request moves `Requested -> {Approved, Rejected, Expired}`; once it
//! reaches a terminal state it is absorbing — a second terminal event for
//! the same `request_id` is not applied, it only increments an anomaly
//! counter, matching the "first terminal event wins" resolution for
//! simultaneous approval terminals.

use std::collections::HashMap;

use ledger_types::{EventPayload, EventType};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where a request currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalState {
    /// Awaiting a decision.
    Requested,
    /// Approved; terminal.
    Approved,
    /// Rejected; terminal.
    Rejected,
    /// Expired without a decision; terminal.
    Expired,
}

impl ApprovalState {
    /// Terminal states cannot transition further.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalState::Requested)
    }
}

/// A tracked approval request and its current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// The request id.
    pub request_id: String,
    /// Current lifecycle state.
    pub state: ApprovalState,
    /// The action that was flagged for approval.
    pub action_type: String,
    /// Who requested the action.
    pub requester_id: String,
    /// Caller-assigned risk classification.
    pub risk_level: String,
    /// Who resolved the request, once terminal.
    pub resolved_by: Option<String>,
    /// Free-text resolution reason, once terminal.
    pub resolution_reason: Option<String>,
}

/// The approval read model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalProjection {
    requests: HashMap<String, ApprovalRecord>,
    anomalies: u64,
}

impl ApprovalProjection {
    /// An empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the projection. Ignores events unrelated to
    /// approvals.
    pub fn apply(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::ApprovalRequested(req) => {
                self.requests.insert(
                    req.request_id.clone(),
                    ApprovalRecord {
                        request_id: req.request_id.clone(),
                        state: ApprovalState::Requested,
                        action_type: req.action_type.clone(),
                        requester_id: req.requester_id.clone(),
                        risk_level: req.risk_level.clone(),
                        resolved_by: None,
                        resolution_reason: None,
                    },
                );
            }
            EventPayload::ApprovalApproved(res) => {
                self.resolve(&res.request_id, ApprovalState::Approved, res)
            }
            EventPayload::ApprovalRejected(res) => {
                self.resolve(&res.request_id, ApprovalState::Rejected, res)
            }
            EventPayload::ApprovalExpired(res) => {
                self.resolve(&res.request_id, ApprovalState::Expired, res)
            }
            _ => {}
        }
    }

    fn resolve(
        &mut self,
        request_id: &str,
        state: ApprovalState,
        res: &ledger_types::ApprovalResolutionPayload,
    ) {
        let Some(record) = self.requests.get_mut(request_id) else {
            warn!(request_id, "resolution for unknown approval request");
            self.anomalies += 1;
            return;
        };
        if record.state.is_terminal() {
            warn!(
                request_id,
                existing = ?record.state,
                incoming = ?state,
                "duplicate terminal event for approval request"
            );
            self.anomalies += 1;
            return;
        }
        record.state = state;
        record.resolved_by = res.resolved_by.clone();
        record.resolution_reason = res.reason.clone();
    }

    /// The current state of `request_id`, if it has ever been requested.
    pub fn state(&self, request_id: &str) -> Option<ApprovalState> {
        self.requests.get(request_id).map(|r| r.state)
    }

    /// The full record for `request_id`, if it exists.
    pub fn get(&self, request_id: &str) -> Option<&ApprovalRecord> {
        self.requests.get(request_id)
    }

    /// Every request still awaiting a decision.
    pub fn pending(&self) -> Vec<&ApprovalRecord> {
        self.requests
            .values()
            .filter(|r| r.state == ApprovalState::Requested)
            .collect()
    }

    /// Number of duplicate-terminal or orphan-resolution anomalies seen.
    pub fn anomalies(&self) -> u64 {
        self.anomalies
    }

    /// Replace this projection's state wholesale, used when restoring from
    /// a snapshot.
    pub fn restore(&mut self, requests: HashMap<String, ApprovalRecord>, anomalies: u64) {
        self.requests = requests;
        self.anomalies = anomalies;
    }

    /// A point-in-time copy of every tracked request.
    pub fn snapshot(&self) -> HashMap<String, ApprovalRecord> {
        self.requests.clone()
    }

    /// Discard all state, used before a full replay.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.anomalies = 0;
    }
}
