//! `Hypothesis`: tested via a caller-supplied runner, scored with a fixed
//! Bayesian-update likelihood table keyed by how many criteria the evidence
//! satisfied (§4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HypothesisOutcome {
    Untested,
    Confirmed,
    Refuted,
    Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub statement: String,
    pub rationale: String,
    pub procedure: Vec<String>,
    pub criteria: Vec<String>,
    pub prior_confidence: f64,
    pub posterior_confidence: f64,
    pub outcome: HypothesisOutcome,
    pub evidence: Vec<String>,
}

/// `test_runner` reports which of `criteria` it found satisfied.
pub type TestRunnerResult = Vec<bool>;

/// Likelihood ratio bucketed by the fraction of criteria met, applied to
/// `prior_confidence` via a simple Bayes-like update:
/// `posterior = clip(prior * likelihood / (prior * likelihood + (1 - prior) * (1 - likelihood)), 0, 1)`.
fn likelihood_for_ratio(ratio: f64) -> f64 {
    if ratio >= 0.9 {
        0.95
    } else if ratio >= 0.6 {
        0.75
    } else if ratio >= 0.3 {
        0.45
    } else {
        0.15
    }
}

pub fn bayesian_update(prior: f64, criteria_met: &TestRunnerResult) -> (f64, HypothesisOutcome) {
    let total = criteria_met.len().max(1) as f64;
    let met = criteria_met.iter().filter(|m| **m).count() as f64;
    let ratio = met / total;
    let likelihood = likelihood_for_ratio(ratio);

    let numerator = prior * likelihood;
    let denominator = numerator + (1.0 - prior) * (1.0 - likelihood);
    let posterior = if denominator > 0.0 { (numerator / denominator).clamp(0.0, 1.0) } else { prior };

    let outcome = if ratio >= 0.9 {
        HypothesisOutcome::Confirmed
    } else if ratio <= 0.1 {
        HypothesisOutcome::Refuted
    } else {
        HypothesisOutcome::Inconclusive
    };

    (posterior, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_criteria_met_raises_confidence_and_confirms() {
        let (posterior, outcome) = bayesian_update(0.5, &vec![true, true, true]);
        assert!(posterior > 0.5);
        assert_eq!(outcome, HypothesisOutcome::Confirmed);
    }

    #[test]
    fn no_criteria_met_lowers_confidence_and_refutes() {
        let (posterior, outcome) = bayesian_update(0.5, &vec![false, false, false]);
        assert!(posterior < 0.5);
        assert_eq!(outcome, HypothesisOutcome::Refuted);
    }
}
