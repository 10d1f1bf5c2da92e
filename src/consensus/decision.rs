//! `Decision` (§3): the record a `ConsensusEngine` opens, collects votes
//! against, and tallies. Votes are keyed by participant id so a repeat
//! `cast_vote` overwrites in place (last-write-wins) instead of appending.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::participant::Role;
use super::vote::Vote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusType {
    Weighted,
    SimpleMajority,
    Supermajority,
    Unanimous,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Open,
    Approved,
    Rejected,
    Expired,
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub title: String,
    pub description: String,
    pub decision_type: String,
    pub criticality: f64,
    pub recommended_option: Option<String>,
    pub required_roles: Vec<Role>,
    pub consensus_type: ConsensusType,
    pub deadline: DateTime<Utc>,
    pub votes: HashMap<String, Vote>,
    pub status: DecisionStatus,
}

#[derive(Debug, Clone)]
pub struct OpenDecisionParams {
    pub title: String,
    pub description: String,
    pub decision_type: String,
    pub criticality: f64,
    pub recommended_option: Option<String>,
    pub required_roles: Vec<Role>,
    pub consensus_type: ConsensusType,
    pub deadline: DateTime<Utc>,
}
