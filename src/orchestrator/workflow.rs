//! Workflow selection (§4.4): which backend(s) a query is dispatched to,
//! derived from `MetaState` and the routing decision.

use crate::backends::Capability;
use crate::meta::{MetaState, RoutingDecision};
use crate::query::{Modality, Query};

const TASK_KEYWORDS: &[&str] = &["code", "function", "algorithm", "compile", "debug", "refactor", "implement", "architecture"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Simple,
    Complex,
    Multimodal,
    Local,
    Ensemble,
}

impl WorkflowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowKind::Simple => "simple",
            WorkflowKind::Complex => "complex",
            WorkflowKind::Multimodal => "multimodal",
            WorkflowKind::Local => "local",
            WorkflowKind::Ensemble => "ensemble",
        }
    }
}

fn task_keywords_match(query: &Query) -> bool {
    let lower = query.text.to_lowercase();
    TASK_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Picks a workflow per §4.4. Ensemble is checked first since it is an
/// override of the ordinary modality/complexity bands, not another band.
pub fn select_workflow(query: &Query, state: &MetaState, decision: &RoutingDecision) -> WorkflowKind {
    if decision.use_ensemble {
        return WorkflowKind::Ensemble;
    }
    if state.modality != Modality::Text {
        return WorkflowKind::Multimodal;
    }
    if state.complexity >= 0.7 || task_keywords_match(query) {
        return WorkflowKind::Local;
    }
    if state.complexity >= 0.5 {
        return WorkflowKind::Complex;
    }
    WorkflowKind::Simple
}

/// The capability tool a `multimodal` workflow should call first, based on
/// the query's modality.
pub fn multimodal_capability(modality: Modality) -> Capability {
    match modality {
        Modality::Audio => Capability::AudioTranscriber,
        _ => Capability::ImageAnalyzer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Ignorance, IgnoranceType, SelfDoubt, Strategy, Temporal};

    fn state(modality: Modality, complexity: f64) -> MetaState {
        MetaState {
            ignorance: Ignorance { ignorance_type: IgnoranceType::UnknownUnknowns, score: 0.0, gaps: vec![] },
            self_doubt: SelfDoubt::new(0.8, 0.8, 0.8, 0, 0.0),
            narrative: String::new(),
            temporal: Temporal::default(),
            strategy: Strategy::Balanced,
            modality,
            complexity,
            criticality: 0.1,
        }
    }

    fn decision(use_ensemble: bool) -> RoutingDecision {
        RoutingDecision { primary_backend: crate::backends::BackendKind::ToolServer, use_ensemble, rationale: vec![] }
    }

    #[test]
    fn scenario_1_trivial_greeting_is_simple() {
        let query = Query::new("hello", Modality::Text);
        assert_eq!(select_workflow(&query, &state(Modality::Text, 0.1), &decision(false)), WorkflowKind::Simple);
    }

    #[test]
    fn scenario_3_image_query_is_multimodal() {
        let query = Query::new("what is in this image?", Modality::Image);
        assert_eq!(select_workflow(&query, &state(Modality::Image, 0.1), &decision(false)), WorkflowKind::Multimodal);
    }

    #[test]
    fn ensemble_overrides_other_bands() {
        let query = Query::new("hello", Modality::Text);
        assert_eq!(select_workflow(&query, &state(Modality::Text, 0.1), &decision(true)), WorkflowKind::Ensemble);
    }
}
