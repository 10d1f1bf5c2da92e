//! Pure tally evaluation (§4.2, §8): a function of `(votes, deadline, rule,
//! weights, now)` only — no I/O, no mutation. `ConsensusEngine::tally`
//! is the only caller that persists the result back onto a `Decision`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::decision::{ConsensusType, Decision, DecisionStatus};
use super::participant::{Participant, Role};
use super::vote::Choice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyOutcome {
    pub decided: bool,
    pub status: DecisionStatus,
    pub rationale: String,
}

/// Resolves `ADAPTIVE` by criticality band (§4.2). `0.75` falls in the
/// `WEIGHTED` band (inclusive upper bound of that band, not the lower bound
/// of `SUPERMAJORITY`).
fn effective_rule(consensus_type: ConsensusType, criticality: f64) -> ConsensusType {
    if consensus_type != ConsensusType::Adaptive {
        return consensus_type;
    }
    if criticality < 0.4 {
        ConsensusType::SimpleMajority
    } else if criticality <= 0.75 {
        ConsensusType::Weighted
    } else if criticality <= 0.9 {
        ConsensusType::Supermajority
    } else {
        ConsensusType::Unanimous
    }
}

struct PresentTally {
    approve_weight: f64,
    reject_weight: f64,
    present_weight: f64,
    approve_count: u32,
    reject_count: u32,
    present_count: u32,
    roles_voted: std::collections::HashSet<Role>,
}

fn tally_present(decision: &Decision, participants: &HashMap<String, Participant>) -> PresentTally {
    let mut t = PresentTally {
        approve_weight: 0.0,
        reject_weight: 0.0,
        present_weight: 0.0,
        approve_count: 0,
        reject_count: 0,
        present_count: 0,
        roles_voted: Default::default(),
    };

    for vote in decision.votes.values() {
        let Some(participant) = participants.get(&vote.participant_id) else { continue };
        if !decision.required_roles.is_empty() && !decision.required_roles.contains(&participant.role) {
            continue;
        }
        t.present_count += 1;
        t.present_weight += participant.weight;
        t.roles_voted.insert(participant.role);
        match vote.choice {
            Choice::Approve => {
                t.approve_count += 1;
                t.approve_weight += participant.weight;
            }
            Choice::Reject => {
                t.reject_count += 1;
                t.reject_weight += participant.weight;
            }
            Choice::Abstain => {}
        }
    }
    t
}

/// Conclusively decided one way or the other given votes *so far*; `None`
/// means the rule cannot yet tell, which either awaits more votes (deadline
/// not reached) or falls through to conflict resolution (deadline reached).
fn rule_verdict(rule: ConsensusType, decision: &Decision, t: &PresentTally) -> Option<bool> {
    match rule {
        ConsensusType::Weighted => {
            if t.present_weight <= 0.0 {
                return None;
            }
            let ratio = t.approve_weight / t.present_weight;
            if ratio >= 0.60 {
                Some(true)
            } else if t.reject_weight > t.approve_weight {
                Some(false)
            } else {
                None
            }
        }
        ConsensusType::SimpleMajority => {
            if t.approve_count > t.reject_count {
                Some(true)
            } else if t.reject_count > t.approve_count {
                Some(false)
            } else {
                None
            }
        }
        ConsensusType::Supermajority => {
            if t.present_count == 0 {
                return None;
            }
            let approve_ratio = t.approve_count as f64 / t.present_count as f64;
            let reject_ratio = t.reject_count as f64 / t.present_count as f64;
            if approve_ratio >= 2.0 / 3.0 {
                Some(true)
            } else if reject_ratio > 1.0 / 3.0 {
                Some(false)
            } else {
                None
            }
        }
        ConsensusType::Unanimous => {
            let all_required_voted = decision.required_roles.iter().all(|r| t.roles_voted.contains(r));
            let has_any_reject = t.reject_count > 0;
            if has_any_reject {
                Some(false)
            } else if !decision.required_roles.is_empty() && all_required_voted && t.approve_count == t.present_count && t.present_count > 0 {
                Some(true)
            } else {
                None
            }
        }
        ConsensusType::Adaptive => unreachable!("resolved by effective_rule before dispatch"),
    }
}

/// Conflict resolution applied only once the deadline has passed and the
/// rule above still returned `None` (§4.2).
fn resolve_by_deadline(decision: &Decision, participants: &HashMap<String, Participant>) -> TallyOutcome {
    if decision.votes.is_empty() {
        return TallyOutcome {
            decided: true,
            status: DecisionStatus::Expired,
            rationale: "timeout: no votes cast before deadline".to_string(),
        };
    }

    for role in [Role::PrimaryUser, Role::Administrator] {
        let overriding = decision.votes.values().find(|v| {
            participants.get(&v.participant_id).map(|p| p.role) == Some(role) && v.choice != Choice::Abstain
        });
        if let Some(vote) = overriding {
            let status = if vote.choice == Choice::Approve { DecisionStatus::Approved } else { DecisionStatus::Rejected };
            return TallyOutcome {
                decided: true,
                status,
                rationale: format!("resolved by {role:?} override vote at deadline"),
            };
        }
    }

    TallyOutcome {
        decided: true,
        status: DecisionStatus::Rejected,
        rationale: "no conclusive rule result and no override vote by deadline; defaulting to rejected".to_string(),
    }
}

/// Pure evaluation over `(decision.votes, decision.deadline, decision.consensus_type,
/// participant weights, now)` (§8). Never mutates `decision`.
pub fn evaluate(decision: &Decision, participants: &HashMap<String, Participant>, now: DateTime<Utc>) -> TallyOutcome {
    let rule = effective_rule(decision.consensus_type, decision.criticality);
    let t = tally_present(decision, participants);

    if let Some(approved) = rule_verdict(rule, decision, &t) {
        let status = if approved { DecisionStatus::Approved } else { DecisionStatus::Rejected };
        return TallyOutcome { decided: true, status, rationale: format!("{rule:?} rule decided {status:?}") };
    }

    if now <= decision.deadline {
        return TallyOutcome { decided: false, status: DecisionStatus::Open, rationale: "pending: deadline not yet reached".to_string() };
    }

    resolve_by_deadline(decision, participants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::decision::OpenDecisionParams;
    use crate::consensus::vote::Vote;

    fn participant(id: &str, role: Role, weight: f64) -> Participant {
        Participant { id: id.to_string(), name: id.to_string(), role, verified: true, weight }
    }

    fn decision(consensus_type: ConsensusType, required_roles: Vec<Role>, criticality: f64, deadline_offset_s: i64) -> Decision {
        let params = OpenDecisionParams {
            title: "t".into(),
            description: "d".into(),
            decision_type: "generic".into(),
            criticality,
            recommended_option: None,
            required_roles,
            consensus_type,
            deadline: Utc::now() + chrono::Duration::seconds(deadline_offset_s),
        };
        Decision {
            id: "d1".into(),
            title: params.title,
            description: params.description,
            decision_type: params.decision_type,
            criticality: params.criticality,
            recommended_option: params.recommended_option,
            required_roles: params.required_roles,
            consensus_type: params.consensus_type,
            deadline: params.deadline,
            votes: Default::default(),
            status: DecisionStatus::Open,
        }
    }

    #[test]
    fn weighted_scenario_4_approves_at_threshold() {
        let mut d = decision(ConsensusType::Weighted, vec![Role::PrimaryUser, Role::Administrator], 0.8, 60);
        d.votes.insert("pu".into(), Vote { participant_id: "pu".into(), choice: Choice::Approve, rationale: None, cast_at: Utc::now() });
        d.votes.insert("admin".into(), Vote { participant_id: "admin".into(), choice: Choice::Reject, rationale: None, cast_at: Utc::now() });
        let mut participants = HashMap::new();
        participants.insert("pu".to_string(), participant("pu", Role::PrimaryUser, 0.6));
        participants.insert("admin".to_string(), participant("admin", Role::Administrator, 0.4));

        let outcome = evaluate(&d, &participants, Utc::now());
        assert!(outcome.decided);
        assert_eq!(outcome.status, DecisionStatus::Approved);
    }

    #[test]
    fn scenario_5_zero_votes_expires_at_deadline() {
        let d = decision(ConsensusType::Weighted, vec![Role::PrimaryUser, Role::Administrator], 0.8, -1);
        let outcome = evaluate(&d, &HashMap::new(), Utc::now());
        assert_eq!(outcome.status, DecisionStatus::Expired);
    }

    #[test]
    fn unanimous_with_zero_present_required_voters_never_approves() {
        let mut d = decision(ConsensusType::Unanimous, vec![Role::PrimaryUser, Role::Administrator], 0.95, -1);
        // A vote from a non-required role: present-tally stays empty.
        d.votes.insert("obs".into(), Vote { participant_id: "obs".into(), choice: Choice::Approve, rationale: None, cast_at: Utc::now() });
        let mut participants = HashMap::new();
        participants.insert("obs".to_string(), participant("obs", Role::Observer, 0.0));

        let outcome = evaluate(&d, &participants, Utc::now());
        assert_ne!(outcome.status, DecisionStatus::Approved);
    }

    #[test]
    fn adaptive_criticality_0_75_maps_to_weighted() {
        assert_eq!(effective_rule(ConsensusType::Adaptive, 0.75), ConsensusType::Weighted);
        assert_eq!(effective_rule(ConsensusType::Adaptive, 0.750001), ConsensusType::Supermajority);
    }

    #[test]
    fn cast_vote_overwrite_changes_tally_outcome() {
        let mut d = decision(ConsensusType::SimpleMajority, vec![Role::PrimaryUser], 0.3, 60);
        let mut participants = HashMap::new();
        participants.insert("pu".to_string(), participant("pu", Role::PrimaryUser, 0.6));

        d.votes.insert("pu".into(), Vote { participant_id: "pu".into(), choice: Choice::Reject, rationale: None, cast_at: Utc::now() });
        assert_eq!(evaluate(&d, &participants, Utc::now()).status, DecisionStatus::Rejected);

        d.votes.insert("pu".into(), Vote { participant_id: "pu".into(), choice: Choice::Approve, rationale: None, cast_at: Utc::now() });
        assert_eq!(evaluate(&d, &participants, Utc::now()).status, DecisionStatus::Approved);
    }
}
