//! `Vote` (§3). At most one per participant per decision; last write wins up
//! to the deadline, rejected after (enforced by `ConsensusEngine::cast_vote`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Choice {
    Approve,
    Reject,
    Abstain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub participant_id: String,
    pub choice: Choice,
    pub rationale: Option<String>,
    pub cast_at: DateTime<Utc>,
}
