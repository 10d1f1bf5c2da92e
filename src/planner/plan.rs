//! `Plan` (§3): a goal's decomposition into a step graph under one of three
//! strategies.

use serde::{Deserialize, Serialize};

use super::step::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStrategy {
    Sequential,
    Parallel,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal_id: String,
    pub strategy: PlanStrategy,
    pub steps: Vec<Step>,
    pub status: PlanStatus,
    pub total_estimated_minutes: u32,
}
