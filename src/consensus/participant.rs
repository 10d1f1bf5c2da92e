//! `Participant` and `Role` (§3). Roles carry a default weight drawn from
//! configuration; weights over *present* voters are renormalized at tally
//! time, never at registration.

use serde::{Deserialize, Serialize};

use crate::config::RoleWeights;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    PrimaryUser,
    Administrator,
    AutonomousAgent,
    Observer,
}

impl Role {
    pub fn default_weight(self, weights: &RoleWeights) -> f64 {
        match self {
            Role::PrimaryUser => weights.primary_user,
            Role::Administrator => weights.administrator,
            Role::AutonomousAgent => weights.autonomous_agent,
            Role::Observer => weights.observer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub verified: bool,
    pub weight: f64,
}
