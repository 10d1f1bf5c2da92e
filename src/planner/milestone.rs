//! `Milestone`: a dated checkpoint against a goal, satisfied when every
//! named criterion is true in the caller-supplied context map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub goal_id: String,
    pub title: String,
    pub target_date: DateTime<Utc>,
    pub criteria: Vec<String>,
    pub achieved: bool,
}

/// `check_milestone` evaluates criteria against this context: each entry
/// names a criterion that was observed true.
pub type MilestoneContext = HashMap<String, bool>;
