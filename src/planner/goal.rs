//! `Goal` (§3): hierarchical, dependency-gated planning entity living in the
//! planner's goal arena. Cross-references (`parent_id`, `dependency_ids`) are
//! plain ids resolved back through `StrategicPlanner`, never back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl GoalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GoalStatus::Completed | GoalStatus::Failed | GoalStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: GoalStatus,
    pub parent_id: Option<String>,
    pub dependency_ids: Vec<String>,
    pub success_criteria: Vec<String>,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateGoalParams {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub parent_id: Option<String>,
    pub dependency_ids: Vec<String>,
    pub success_criteria: Vec<String>,
}
