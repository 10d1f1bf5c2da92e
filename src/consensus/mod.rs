//! Multi-stakeholder consensus engine (C5, §4.2). Generalizes the teacher's
//! `AppState`-held `Mutex<HashMap<...>>` registries into two `IdTable`s
//! (participants, decisions) behind the shared reader-writer-lock idiom used
//! throughout this crate (§9 "global singletons" redesign hint — constructed
//! once at startup, passed in, never looked up through a global).

mod decision;
mod participant;
mod tally;
mod vote;

pub use decision::{ConsensusType, Decision, DecisionStatus, OpenDecisionParams};
pub use participant::{Participant, Role};
pub use tally::TallyOutcome;
pub use vote::{Choice, Vote};

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;

use crate::config::RoleWeights;
use crate::emit_event;
use crate::error::{AppError, AppResult};
use crate::event_bus::OrchestratorEvent;
use crate::registry::{new_id, IdTable};

pub struct ConsensusEngine {
    participants: IdTable<Participant>,
    decisions: IdTable<Decision>,
    role_weights: RoleWeights,
}

impl ConsensusEngine {
    pub fn new(role_weights: RoleWeights) -> Self {
        Self { participants: IdTable::new(), decisions: IdTable::new(), role_weights }
    }

    /// Duplicate names are allowed; each id is unique (§4.2).
    pub async fn register_participant(&self, name: impl Into<String>, role: Role, verified: bool) -> String {
        let id = new_id();
        let weight = role.default_weight(&self.role_weights);
        self.participants.insert(id.clone(), Participant { id: id.clone(), name: name.into(), role, verified, weight }).await;
        id
    }

    pub async fn open_decision(&self, params: OpenDecisionParams) -> AppResult<String> {
        if params.deadline <= Utc::now() {
            return Err(AppError::invalid_input("deadline must be in the future"));
        }
        if !(0.0..=1.0).contains(&params.criticality) {
            return Err(AppError::invalid_input("criticality must be in [0, 1]"));
        }

        let id = new_id();
        let decision = Decision {
            id: id.clone(),
            title: params.title,
            description: params.description,
            decision_type: params.decision_type,
            criticality: params.criticality,
            recommended_option: params.recommended_option,
            required_roles: params.required_roles,
            consensus_type: params.consensus_type,
            deadline: params.deadline,
            votes: HashMap::new(),
            status: DecisionStatus::Open,
        };
        self.decisions.insert(id.clone(), decision).await;
        emit_event!(OrchestratorEvent::ConsensusOpened { decision_id: id.clone() });
        Ok(id)
    }

    pub async fn cast_vote(&self, decision_id: &str, participant_id: &str, choice: Choice, rationale: Option<String>) -> AppResult<()> {
        let participant = self
            .participants
            .get(participant_id)
            .await
            .ok_or_else(|| AppError::not_found(format!("unknown participant '{participant_id}'")))?;

        if !participant.verified {
            return Err(AppError::unauthorized("participant is not verified"));
        }

        let now = Utc::now();
        let vote = Vote { participant_id: participant_id.to_string(), choice, rationale, cast_at: now };

        self.decisions
            .update(decision_id, |decision| {
                if decision.status != DecisionStatus::Open || now > decision.deadline {
                    return Err(AppError::precondition("decision is not open for voting"));
                }
                decision.votes.insert(participant_id.to_string(), vote);
                Ok(())
            })
            .await
            .ok_or_else(|| AppError::not_found(format!("unknown decision '{decision_id}'")))??;

        self.tally(decision_id).await.map(|_| ())
    }

    /// Pure over current votes and deadline (§4.2), but persists the
    /// resulting status onto the stored `Decision` and emits an event when
    /// the outcome becomes terminal.
    pub async fn tally(&self, decision_id: &str) -> AppResult<TallyOutcome> {
        let decision = self.decisions.get(decision_id).await.ok_or_else(|| AppError::not_found(format!("unknown decision '{decision_id}'")))?;

        let participants: HashMap<String, Participant> = self.participants.values().await.into_iter().map(|p| (p.id.clone(), p)).collect();
        let outcome = tally::evaluate(&decision, &participants, Utc::now());

        if outcome.decided && outcome.status != decision.status {
            self.decisions.update(decision_id, |d| d.status = outcome.status).await;
            emit_event!(OrchestratorEvent::ConsensusTallied { decision_id: decision_id.to_string(), approved: outcome.status == DecisionStatus::Approved });
        }

        Ok(outcome)
    }

    /// Auto-vote hook for `AUTONOMOUS_AGENT` participants (§4.2, Open Question 2):
    /// approves iff a recommended option exists and `risk < threshold`,
    /// otherwise abstains. Risk and the threshold are supplied by the caller
    /// (the orchestrator, via `MetaCognition.route` and configuration).
    pub async fn auto_vote_agent(&self, decision_id: &str, participant_id: &str, recommended_option_present: bool, risk: f64, threshold: f64) -> AppResult<()> {
        let choice = if recommended_option_present && risk < threshold { Choice::Approve } else { Choice::Abstain };
        self.cast_vote(decision_id, participant_id, choice, Some("auto-vote".to_string())).await
    }

    pub async fn get_decision(&self, decision_id: &str) -> Option<Decision> {
        self.decisions.get(decision_id).await
    }

    pub async fn get_participant(&self, participant_id: &str) -> Option<Participant> {
        self.participants.get(participant_id).await
    }

    pub async fn has_primary_user(&self) -> bool {
        self.participants.values().await.iter().any(|p| p.role == Role::PrimaryUser)
    }

    /// Decisions still awaiting a terminal tally, for callers (and tests)
    /// that need to observe a decision opened internally by the
    /// orchestrator's consensus gate rather than one they opened themselves.
    pub async fn list_open_decisions(&self) -> Vec<Decision> {
        self.decisions.values().await.into_iter().filter(|d| d.status == DecisionStatus::Open).collect()
    }

    /// Loads a previously-persisted participant registry (§6 "Persisted
    /// state layout"), ignoring a missing file so a fresh deployment starts
    /// with an empty registry rather than failing.
    pub async fn restore_participants(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(AppError::internal)?;
        let participants: Vec<Participant> = serde_json::from_str(&raw).map_err(AppError::internal)?;
        for participant in participants {
            self.participants.insert(participant.id.clone(), participant).await;
        }
        Ok(())
    }

    /// Atomic replace, matching the same write-temp-then-rename pattern
    /// `FeatureFlags::persist` uses for its own small JSON file.
    pub async fn persist_participants(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let participants = self.participants.values().await;
        let json = serde_json::to_string_pretty(&participants).map_err(AppError::internal)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(AppError::internal)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(AppError::internal)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(AppError::internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(consensus_type: ConsensusType, required_roles: Vec<Role>, criticality: f64, deadline_offset_ms: i64) -> OpenDecisionParams {
        OpenDecisionParams {
            title: "deploy migration now".into(),
            description: "critical op".into(),
            decision_type: "deployment".into(),
            criticality,
            recommended_option: Some("proceed".into()),
            required_roles,
            consensus_type,
            deadline: Utc::now() + chrono::Duration::milliseconds(deadline_offset_ms),
        }
    }

    #[tokio::test]
    async fn open_decision_rejects_past_deadline() {
        let engine = ConsensusEngine::new(RoleWeights::default());
        let err = engine.open_decision(params(ConsensusType::Weighted, vec![], 0.5, -1000)).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn scenario_4_weighted_approval() {
        let engine = ConsensusEngine::new(RoleWeights::default());
        let primary = engine.register_participant("alice", Role::PrimaryUser, true).await;
        let admin = engine.register_participant("bob", Role::Administrator, true).await;

        let decision_id = engine
            .open_decision(params(ConsensusType::Weighted, vec![Role::PrimaryUser, Role::Administrator], 0.8, 60_000))
            .await
            .unwrap();

        engine.cast_vote(&decision_id, &primary, Choice::Approve, None).await.unwrap();
        engine.cast_vote(&decision_id, &admin, Choice::Reject, None).await.unwrap();

        let outcome = engine.tally(&decision_id).await.unwrap();
        assert_eq!(outcome.status, DecisionStatus::Approved);
    }

    #[tokio::test]
    async fn unverified_participant_cannot_vote() {
        let engine = ConsensusEngine::new(RoleWeights::default());
        let participant = engine.register_participant("mallory", Role::Observer, false).await;
        let decision_id = engine.open_decision(params(ConsensusType::SimpleMajority, vec![], 0.3, 60_000)).await.unwrap();

        let err = engine.cast_vote(&decision_id, &participant, Choice::Approve, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn voting_after_deadline_is_precondition_error() {
        let engine = ConsensusEngine::new(RoleWeights::default());
        let participant = engine.register_participant("alice", Role::PrimaryUser, true).await;
        let decision_id = engine.open_decision(params(ConsensusType::SimpleMajority, vec![], 0.3, 50)).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let err = engine.cast_vote(&decision_id, &participant, Choice::Approve, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Precondition);
    }

    #[tokio::test]
    async fn duplicate_vote_overwrites_and_retallies() {
        let engine = ConsensusEngine::new(RoleWeights::default());
        let primary = engine.register_participant("alice", Role::PrimaryUser, true).await;
        let decision_id = engine.open_decision(params(ConsensusType::SimpleMajority, vec![Role::PrimaryUser], 0.3, 60_000)).await.unwrap();

        engine.cast_vote(&decision_id, &primary, Choice::Reject, None).await.unwrap();
        assert_eq!(engine.tally(&decision_id).await.unwrap().status, DecisionStatus::Rejected);

        engine.cast_vote(&decision_id, &primary, Choice::Approve, None).await.unwrap();
        assert_eq!(engine.tally(&decision_id).await.unwrap().status, DecisionStatus::Approved);
    }
}
