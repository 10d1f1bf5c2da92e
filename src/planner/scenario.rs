//! `Scenario`: a pure what-if evaluator (§4.3). `simulate` scores
//! `assumptions` with a fixed weighting over complexity/resources/constraints
//! and never touches planner state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioAssumptions {
    /// Higher = harder to pull off.
    pub complexity: f64,
    /// 0 = no resources available, 1 = fully resourced.
    pub resource_availability: f64,
    /// Count of hard constraints (deadlines, dependencies, approvals) in play.
    pub constraint_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub assumptions: ScenarioAssumptions,
    pub simulated_success_probability: f64,
    pub reasoning: String,
}

/// `simulate(scenario)` (§4.3): a scoring function over the scenario's
/// assumptions, pure and side-effect free.
pub fn simulate(assumptions: &ScenarioAssumptions) -> (f64, String) {
    let complexity_penalty = assumptions.complexity.clamp(0.0, 1.0);
    let resource_bonus = assumptions.resource_availability.clamp(0.0, 1.0);
    let constraint_penalty = (assumptions.constraint_count as f64 * 0.08).min(0.6);

    let probability = (0.5 - 0.35 * complexity_penalty + 0.35 * resource_bonus - constraint_penalty).clamp(0.0, 1.0);
    let reasoning = format!(
        "base 0.50, complexity penalty -{:.2}, resource bonus +{:.2}, {} constraint(s) penalty -{:.2}",
        0.35 * complexity_penalty,
        0.35 * resource_bonus,
        assumptions.constraint_count,
        constraint_penalty
    );
    (probability, reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_complexity_high_resources_scores_high() {
        let (p, _) = simulate(&ScenarioAssumptions { complexity: 0.1, resource_availability: 0.9, constraint_count: 0 });
        assert!(p > 0.6);
    }

    #[test]
    fn high_complexity_no_resources_scores_low() {
        let (p, _) = simulate(&ScenarioAssumptions { complexity: 1.0, resource_availability: 0.0, constraint_count: 5 });
        assert!(p < 0.2);
    }
}
