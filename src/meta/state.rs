//! `MetaState` and its constituents (§3).

use serde::{Deserialize, Serialize};

use crate::query::Modality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IgnoranceType {
    KnownUnknowns,
    UnknownUnknowns,
    Epistemic,
    Aleatory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ignorance {
    pub ignorance_type: IgnoranceType,
    pub score: f64,
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfDoubt {
    pub confidence: f64,
    pub reasoning_clarity: f64,
    pub evidence_strength: f64,
    pub alternatives_count: u32,
    pub uncertainty: f64,
    pub composite: f64,
}

impl SelfDoubt {
    /// `composite = clip(0.35*conf + 0.25*clarity + 0.25*evidence + 0.15*(1-uncertainty) - 0.05*alternatives_count, 0, 1)`
    pub fn new(confidence: f64, reasoning_clarity: f64, evidence_strength: f64, alternatives_count: u32, uncertainty: f64) -> Self {
        let raw = 0.35 * confidence + 0.25 * reasoning_clarity + 0.25 * evidence_strength
            + 0.15 * (1.0 - uncertainty)
            - 0.05 * alternatives_count as f64;
        let composite = raw.clamp(0.0, 1.0);
        Self { confidence, reasoning_clarity, evidence_strength, alternatives_count, uncertainty, composite }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Conservative,
    Exploratory,
    Balanced,
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Temporal {
    pub session_age_s: u64,
    pub context_freshness: f64,
    pub interactions: u32,
}

impl Default for Temporal {
    fn default() -> Self {
        Self { session_age_s: 0, context_freshness: 1.0, interactions: 0 }
    }
}

/// Per-query scratchpad (§3). Created by `analyze`, discarded after the
/// episode is recorded — never the thing a caller persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaState {
    pub ignorance: Ignorance,
    pub self_doubt: SelfDoubt,
    pub narrative: String,
    pub temporal: Temporal,
    pub strategy: Strategy,
    /// Cached from the query so that `route` stays a pure function of
    /// `(MetaState, available_backends, options)` per §8, without needing
    /// the `Query` itself as a separate argument.
    pub modality: Modality,
    pub complexity: f64,
    pub criticality: f64,
}

impl MetaState {
    /// The conservative, zero-confidence fallback state returned on
    /// internal failure (§4.1 Failure semantics) — never panics.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            ignorance: Ignorance { ignorance_type: IgnoranceType::UnknownUnknowns, score: 1.0, gaps: vec![reason.into()] },
            self_doubt: SelfDoubt::new(0.0, 0.0, 0.0, 0, 1.0),
            narrative: "fallback state after internal error".to_string(),
            temporal: Temporal::default(),
            strategy: Strategy::Conservative,
            modality: Modality::Text,
            complexity: 0.0,
            criticality: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_matches_formula_on_a_known_point() {
        let sd = SelfDoubt::new(0.8, 0.6, 0.5, 1, 0.2);
        let expected: f64 = 0.35 * 0.8 + 0.25 * 0.6 + 0.25 * 0.5 + 0.15 * 0.8 - 0.05;
        assert!((sd.composite - expected.clamp(0.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn composite_is_clipped_to_unit_interval() {
        let high = SelfDoubt::new(10.0, 10.0, 10.0, 0, 0.0);
        assert_eq!(high.composite, 1.0);
        let low = SelfDoubt::new(0.0, 0.0, 0.0, 100, 1.0);
        assert_eq!(low.composite, 0.0);
    }

    #[test]
    fn fallback_state_is_conservative_and_zeroed() {
        let state = MetaState::fallback("boom");
        assert_eq!(state.strategy, Strategy::Conservative);
        assert_eq!(state.self_doubt.composite, 0.0);
        assert!(state.ignorance.gaps.contains(&"boom".to_string()));
    }
}
