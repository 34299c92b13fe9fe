//! Collaboration and externality-of-cost bookkeeping.
//!
//! Grounded in the original `projections.py::CollaborationRecord` and the
//! `REUSE_DETECTED`/`EOC_REGULATED`/`MISSION_RATED` events it tracks
//! alongside ledger and approval state. These are monotonic counters, not
//! a state machine: nothing here ever transitions or gets superseded.

use std::collections::HashMap;

use ledger_types::EventPayload;
use serde::{Deserialize, Serialize};

/// One recorded collaboration, kept for lookup by `collaboration_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationRecord {
    /// Team the collaborating agents belong to.
    pub team_id: String,
    /// Agents that participated.
    pub agent_ids: Vec<String>,
    /// Mission the collaboration contributed to.
    pub mission_id: String,
    /// Per-agent contribution score at the time this collaboration was
    /// recorded.
    pub contribution_scores: HashMap<String, f64>,
    /// Reward distributed for this collaboration.
    pub reward: f64,
}

/// Running totals derived from collaboration, reuse, externality and
/// rating events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynergyProjection {
    collaborations_recorded: u64,
    total_reward_distributed: f64,
    contribution_totals: HashMap<String, f64>,
    team_rewards: HashMap<String, f64>,
    collaborations: HashMap<String, CollaborationRecord>,
    reuse_events: u64,
    total_reuse_count: u64,
    reuse_by_resource: HashMap<String, u64>,
    eoc_scores: HashMap<String, f64>,
    mission_ratings: HashMap<String, Vec<f64>>,
}

impl SynergyProjection {
    /// An empty projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the projection. Ignores event types it doesn't
    /// track.
    pub fn apply(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::CollaborationRecorded(c) => {
                self.collaborations_recorded += 1;
                self.total_reward_distributed += c.reward;
                for (agent_id, score) in &c.contribution_scores {
                    *self.contribution_totals.entry(agent_id.clone()).or_insert(0.0) += score;
                }
                *self.team_rewards.entry(c.team_id.clone()).or_insert(0.0) += c.reward;
                self.collaborations.insert(
                    c.collaboration_id.clone(),
                    CollaborationRecord {
                        team_id: c.team_id.clone(),
                        agent_ids: c.agent_ids.clone(),
                        mission_id: c.mission_id.clone(),
                        contribution_scores: c.contribution_scores.clone(),
                        reward: c.reward,
                    },
                );
            }
            EventPayload::ReuseDetected(r) => {
                self.reuse_events += 1;
                self.total_reuse_count += r.reuse_count_delta;
                *self
                    .reuse_by_resource
                    .entry(r.resource_id.clone())
                    .or_insert(0) += r.reuse_count_delta;
            }
            EventPayload::EocRegulated(e) => {
                self.eoc_scores.insert(e.entity_id.clone(), e.eoc_score);
            }
            EventPayload::MissionRated(m) => {
                self.mission_ratings
                    .entry(m.mission_id.clone())
                    .or_default()
                    .push(m.rating);
            }
            _ => {}
        }
    }

    /// Total number of `COLLABORATION_RECORDED` events folded.
    pub fn collaborations_recorded(&self) -> u64 {
        self.collaborations_recorded
    }

    /// Total reward distributed across every recorded collaboration.
    pub fn total_reward_distributed(&self) -> f64 {
        self.total_reward_distributed
    }

    /// The running contribution total for one agent across all
    /// collaborations it has participated in.
    pub fn contribution_total(&self, agent_id: &str) -> f64 {
        self.contribution_totals.get(agent_id).copied().unwrap_or(0.0)
    }

    /// Total reward distributed to `team_id` across every collaboration it
    /// has participated in.
    pub fn team_reward(&self, team_id: &str) -> f64 {
        self.team_rewards.get(team_id).copied().unwrap_or(0.0)
    }

    /// The collaboration recorded under `collaboration_id`, if any.
    pub fn collaboration(&self, collaboration_id: &str) -> Option<&CollaborationRecord> {
        self.collaborations.get(collaboration_id)
    }

    /// Total number of `REUSE_DETECTED` events folded.
    pub fn reuse_events(&self) -> u64 {
        self.reuse_events
    }

    /// Total reuse count across every resource.
    pub fn total_reuse_count(&self) -> u64 {
        self.total_reuse_count
    }

    /// Reuse count for a specific resource.
    pub fn reuse_count_for(&self, resource_id: &str) -> u64 {
        self.reuse_by_resource.get(resource_id).copied().unwrap_or(0)
    }

    /// Most recent externality-of-cost score recorded for `entity_id`.
    pub fn eoc_score(&self, entity_id: &str) -> Option<f64> {
        self.eoc_scores.get(entity_id).copied()
    }

    /// Mean rating recorded for `mission_id`, if it has been rated at
    /// least once.
    pub fn mean_mission_rating(&self, mission_id: &str) -> Option<f64> {
        let ratings = self.mission_ratings.get(mission_id)?;
        if ratings.is_empty() {
            return None;
        }
        Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
    }

    /// Discard all state, used before a full replay.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_types::{CollaborationRecordedPayload, EocRegulatedPayload, MissionRatedPayload, ReuseDetectedPayload};

    #[test]
    fn collaboration_accumulates_reward_and_contributions() {
        let mut proj = SynergyProjection::new();
        let mut scores = HashMap::new();
        scores.insert("agent-1".to_string(), 0.6);
        scores.insert("agent-2".to_string(), 0.4);
        proj.apply(&EventPayload::CollaborationRecorded(CollaborationRecordedPayload {
            collaboration_id: "c1".into(),
            team_id: "team-1".into(),
            agent_ids: vec!["agent-1".into(), "agent-2".into()],
            mission_id: "m1".into(),
            contribution_scores: scores,
            reward: 10.0,
        }));

        assert_eq!(proj.collaborations_recorded(), 1);
        assert_eq!(proj.total_reward_distributed(), 10.0);
        assert_eq!(proj.contribution_total("agent-1"), 0.6);
        assert_eq!(proj.team_reward("team-1"), 10.0);
        let record = proj.collaboration("c1").unwrap();
        assert_eq!(record.team_id, "team-1");
        assert_eq!(record.agent_ids, vec!["agent-1".to_string(), "agent-2".to_string()]);
    }

    #[test]
    fn mission_rating_averages_multiple_ratings() {
        let mut proj = SynergyProjection::new();
        proj.apply(&EventPayload::MissionRated(MissionRatedPayload {
            mission_id: "m1".into(),
            rating: 0.8,
            rater_id: None,
        }));
        proj.apply(&EventPayload::MissionRated(MissionRatedPayload {
            mission_id: "m1".into(),
            rating: 0.6,
            rater_id: None,
        }));
        assert_eq!(proj.mean_mission_rating("m1"), Some(0.7));
    }

    #[test]
    fn reuse_and_eoc_are_tracked_independently() {
        let mut proj = SynergyProjection::new();
        proj.apply(&EventPayload::ReuseDetected(ReuseDetectedPayload {
            resource_id: "res-1".into(),
            reused_by: "agent-1".into(),
            reuse_count_delta: 3,
        }));
        proj.apply(&EventPayload::EocRegulated(EocRegulatedPayload {
            entity_id: "agent-1".into(),
            eoc_score: 0.2,
            regime: "normal".into(),
        }));

        assert_eq!(proj.reuse_count_for("res-1"), 3);
        assert_eq!(proj.eoc_score("agent-1"), Some(0.2));
    }
}
