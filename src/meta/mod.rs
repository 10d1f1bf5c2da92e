//! MetaCognition (C4, §4.1): analyzes a query into a `MetaState`, routes it
//! to a backend, and scores answer quality. Generalizes the teacher's
//! `Router` (`src/orchestrator/router.rs`) — a struct wrapping heuristics
//! plus an LLM fallback — into a pure-function core with no LLM dependency:
//! the "provider" here is the complexity classifier, not a chat model.

mod state;

pub use state::{Ignorance, IgnoranceType, MetaState, SelfDoubt, Strategy, Temporal};

use crate::backends::{BackendInfo, BackendKind, Capability, Episode};
use crate::error::{AppError, AppResult};
use crate::query::{Modality, Query, QueryOptions};

/// Context `analyze` needs beyond the query itself: recent episodes
/// (bounded, most-recent-first), the backends currently available with
/// their capability tags, and the session's temporal snapshot (§4.1).
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub recent_episodes: Vec<Episode>,
    pub available_backends: Vec<BackendInfo>,
    pub temporal: Temporal,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub primary_backend: BackendKind,
    pub use_ensemble: bool,
    pub rationale: Vec<String>,
}

const CRITICAL_KEYWORDS: &[&str] =
    &["deploy", "migration", "production", "delete", "drop table", "irreversible", "release now", "rollback"];

const ENGINEERING_KEYWORDS: &[&str] =
    &["code", "function", "algorithm", "compile", "debug", "refactor", "implement", "architecture", "derive"];

#[derive(Debug, Clone)]
pub struct MetaCognition {
    /// Default strategy used when neither a strategy hint nor a resolvable
    /// adaptive history is available.
    default_strategy: Strategy,
}

impl MetaCognition {
    pub fn new(default_strategy: Strategy) -> Self {
        Self { default_strategy }
    }

    /// Produces a `MetaState` for `query`. Fails `INVALID_INPUT` only if
    /// `query.text` is empty (§4.1).
    pub fn analyze(&self, query: &Query, context: &AnalysisContext) -> AppResult<MetaState> {
        if query.text.trim().is_empty() {
            return Err(AppError::invalid_input("query.text must not be empty"));
        }

        let complexity = classify_complexity(query, &context.recent_episodes);
        let required = required_capabilities(query, complexity);
        let ignorance = compute_ignorance(&required, &context.available_backends, &context.recent_episodes);
        let strategy = self.resolve_strategy(query, &context.recent_episodes);
        let self_doubt = compute_self_doubt(query, &ignorance, &context.recent_episodes);
        let narrative = build_narrative(&context.recent_episodes);
        let criticality = estimate_criticality(query, &ignorance);

        Ok(MetaState {
            ignorance,
            self_doubt,
            narrative,
            temporal: context.temporal.clone(),
            strategy,
            modality: query.modality,
            complexity,
            criticality,
        })
    }

    /// Resolves `strategy_hint` (or the configured default) into a concrete
    /// strategy. `ADAPTIVE` is resolved here — against session history,
    /// which only `analyze` has access to — so that `route` stays a pure
    /// function of `(MetaState, available_backends, options)` alone (§8):
    /// by the time `route` runs, `MetaState.strategy` already names one of
    /// CONSERVATIVE/EXPLORATORY/BALANCED.
    fn resolve_strategy(&self, query: &Query, recent_episodes: &[Episode]) -> Strategy {
        let requested = query
            .options
            .strategy_hint
            .as_deref()
            .and_then(parse_strategy)
            .unwrap_or(self.default_strategy);

        if requested != Strategy::Adaptive {
            return requested;
        }
        resolve_adaptive_strategy(recent_episodes)
    }

    /// Deterministic routing policy (§4.1). Pure over its inputs.
    pub fn route(&self, state: &MetaState, backends: &[BackendInfo], options: &QueryOptions) -> RoutingDecision {
        let mut rationale = Vec::new();

        // 1. Non-text modality with a matching capability short-circuits everything else.
        if let Some(needed) = modality_capability(state.modality) {
            if let Some(backend) = backends.iter().find(|b| b.capabilities.contains(&needed)) {
                rationale.push(format!("modality {:?} matched by capability {}", state.modality, needed.as_tag()));
                return RoutingDecision { primary_backend: backend.kind, use_ensemble: false, rationale };
            }
            rationale.push(format!("modality {:?} requires {} but no backend advertises it", state.modality, needed.as_tag()));
        }

        let has_tool_server = backends.iter().any(|b| b.kind == BackendKind::ToolServer);
        let has_local_reasoner = backends.iter().any(|b| b.kind == BackendKind::LocalReasoner);

        let primary_backend = match state.strategy {
            Strategy::Conservative => {
                rationale.push("CONSERVATIVE: prefer tool server, local reasoner only if unavailable".to_string());
                if has_tool_server { BackendKind::ToolServer } else { BackendKind::LocalReasoner }
            }
            Strategy::Exploratory => {
                if state.self_doubt.composite >= 0.5 && has_local_reasoner {
                    rationale.push("EXPLORATORY: composite >= 0.5, preferring local reasoner".to_string());
                    BackendKind::LocalReasoner
                } else {
                    rationale.push("EXPLORATORY: falling back to tool server".to_string());
                    if has_tool_server { BackendKind::ToolServer } else { BackendKind::LocalReasoner }
                }
            }
            Strategy::Balanced => {
                if state.complexity < 0.5 {
                    rationale.push("BALANCED: complexity < 0.5, using tool server".to_string());
                    BackendKind::ToolServer
                } else if state.complexity < 0.7 {
                    rationale.push("BALANCED: complexity in [0.5, 0.7), tool server with retrieval".to_string());
                    BackendKind::ToolServer
                } else {
                    rationale.push("BALANCED: complexity >= 0.7, using local reasoner".to_string());
                    if has_local_reasoner { BackendKind::LocalReasoner } else { BackendKind::ToolServer }
                }
            }
            // Never produced by `analyze`, but kept total: defaults to BALANCED's rule.
            Strategy::Adaptive => {
                rationale.push("ADAPTIVE state reached route() unresolved; defaulting to BALANCED policy".to_string());
                if state.complexity >= 0.7 && has_local_reasoner { BackendKind::LocalReasoner } else { BackendKind::ToolServer }
            }
        };

        let use_ensemble = state.self_doubt.composite < 0.5 && state.criticality >= 0.7 && options.allow_ensemble;
        if use_ensemble {
            rationale.push(format!(
                "ensemble: composite={:.2} < 0.5, criticality={:.2} >= 0.7, allow_ensemble=true",
                state.self_doubt.composite, state.criticality
            ));
        }

        RoutingDecision { primary_backend, use_ensemble, rationale }
    }

    /// Heuristic, rule-based quality scorer (§4.1). Pure over its inputs.
    pub fn evaluate(&self, query: &Query, answer: &str) -> f64 {
        evaluate_answer(query, answer)
    }
}

fn modality_capability(modality: Modality) -> Option<Capability> {
    match modality {
        Modality::Image => Some(Capability::ImageAnalyzer),
        Modality::Audio => Some(Capability::AudioTranscriber),
        // Mixed attachments most commonly carry an image; audio is checked
        // as a second pass by the caller if this capability is unavailable.
        Modality::Mixed => Some(Capability::ImageAnalyzer),
        Modality::Text => None,
    }
}

/// Parses a configured default strategy name (`config.strategy_default`),
/// falling back to `ADAPTIVE` for an unrecognized value rather than failing
/// startup over a typo.
pub fn strategy_from_config(name: &str) -> Strategy {
    parse_strategy(name).unwrap_or(Strategy::Adaptive)
}

fn parse_strategy(hint: &str) -> Option<Strategy> {
    match hint.to_uppercase().as_str() {
        "CONSERVATIVE" => Some(Strategy::Conservative),
        "EXPLORATORY" => Some(Strategy::Exploratory),
        "BALANCED" => Some(Strategy::Balanced),
        "ADAPTIVE" => Some(Strategy::Adaptive),
        _ => None,
    }
}

fn resolve_adaptive_strategy(recent_episodes: &[Episode]) -> Strategy {
    let candidates = [Strategy::Conservative, Strategy::Exploratory, Strategy::Balanced];
    let mut best = Strategy::Balanced;
    let mut best_mean = f64::MIN;

    for candidate in candidates {
        let tag = strategy_tag(candidate);
        let matching: Vec<f64> = recent_episodes.iter().filter(|e| e.routing_strategy == tag).map(|e| e.quality).collect();
        if matching.is_empty() {
            continue;
        }
        let mean = matching.iter().sum::<f64>() / matching.len() as f64;
        // Strictly greater so ties break toward BALANCED, which is checked last below.
        if mean > best_mean {
            best_mean = mean;
            best = candidate;
        }
    }
    best
}

/// Tag used to record a resolved `Strategy` onto `Episode.routing_strategy`
/// (§4.1 ADAPTIVE selection groups prior episodes by this tag).
pub fn strategy_tag(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Conservative => "conservative",
        Strategy::Exploratory => "exploratory",
        Strategy::Balanced => "balanced",
        Strategy::Adaptive => "adaptive",
    }
}

fn classify_complexity(query: &Query, recent_episodes: &[Episode]) -> f64 {
    let word_count = query.text.split_whitespace().count();
    let length_score = (word_count as f64 / 40.0).min(1.0);

    let lower = query.text.to_lowercase();
    let keyword_score = if ENGINEERING_KEYWORDS.iter().any(|k| lower.contains(k)) { 1.0 } else { 0.0 };

    let novelty = 1.0 - recent_episodes.iter().map(|e| word_overlap(&lower, &e.query_text.to_lowercase())).fold(0.0, f64::max);

    (0.4 * length_score + 0.3 * keyword_score + 0.3 * novelty).clamp(0.0, 1.0)
}

fn word_overlap(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn required_capabilities(query: &Query, complexity: f64) -> Vec<Capability> {
    match query.modality {
        Modality::Image => vec![Capability::ImageAnalyzer],
        Modality::Audio => vec![Capability::AudioTranscriber],
        Modality::Mixed => vec![Capability::ImageAnalyzer, Capability::AudioTranscriber],
        Modality::Text => {
            let mut caps = vec![Capability::ConversationalResponder];
            if complexity >= 0.5 {
                caps.push(Capability::Retriever);
            }
            caps
        }
    }
}

fn compute_ignorance(required: &[Capability], backends: &[BackendInfo], recent_episodes: &[Episode]) -> Ignorance {
    let missing: Vec<String> = required
        .iter()
        .filter(|cap| !backends.iter().any(|b| b.capabilities.contains(cap)))
        .map(|cap| cap.as_tag().to_string())
        .collect();

    let score = if required.is_empty() { 0.0 } else { missing.len() as f64 / required.len() as f64 }.clamp(0.0, 1.0);

    let ignorance_type = if !missing.is_empty() {
        IgnoranceType::KnownUnknowns
    } else if recent_episodes.is_empty() {
        IgnoranceType::UnknownUnknowns
    } else if has_conflicting_evidence(recent_episodes) {
        IgnoranceType::Epistemic
    } else if backends.iter().any(|b| b.stochastic) {
        IgnoranceType::Aleatory
    } else {
        IgnoranceType::UnknownUnknowns
    };

    Ignorance { ignorance_type, score, gaps: missing }
}

/// Conflicting prior evidence: some strategy's recent outcomes span a wide
/// quality range, suggesting the same approach succeeded and failed under
/// similar conditions.
fn has_conflicting_evidence(recent_episodes: &[Episode]) -> bool {
    use std::collections::HashMap;
    let mut by_strategy: HashMap<&str, (f64, f64)> = HashMap::new();
    for episode in recent_episodes {
        let entry = by_strategy.entry(episode.strategy_used.as_str()).or_insert((f64::MAX, f64::MIN));
        entry.0 = entry.0.min(episode.quality);
        entry.1 = entry.1.max(episode.quality);
    }
    by_strategy.values().any(|(min, max)| max - min > 0.5)
}

fn compute_self_doubt(query: &Query, ignorance: &Ignorance, recent_episodes: &[Episode]) -> SelfDoubt {
    let confidence = 1.0 - ignorance.score;

    let lower = query.text.to_lowercase();
    let reasoning_clarity =
        if lower.trim_end().ends_with('?') || ["explain", "describe", "list", "write", "create", "fix", "summarize"].iter().any(|k| lower.contains(k)) {
            0.8
        } else {
            0.5
        };

    let evidence_strength = if recent_episodes.is_empty() {
        0.3
    } else {
        recent_episodes.iter().map(|e| e.quality).sum::<f64>() / recent_episodes.len() as f64
    };

    let distinct_strategies: std::collections::HashSet<&str> =
        recent_episodes.iter().map(|e| e.strategy_used.as_str()).collect();
    let alternatives_count = distinct_strategies.len().min(3) as u32;

    let uncertainty = ignorance.score;

    SelfDoubt::new(confidence, reasoning_clarity, evidence_strength, alternatives_count, uncertainty)
}

fn build_narrative(recent_episodes: &[Episode]) -> String {
    if recent_episodes.is_empty() {
        return "No prior episodes in this session.".to_string();
    }
    let successes = recent_episodes.iter().filter(|e| e.quality >= 0.7).count();
    let failures = recent_episodes.len() - successes;
    format!(
        "Last {} episode(s): {} succeeded (quality >= 0.7), {} fell short.",
        recent_episodes.len(),
        successes,
        failures
    )
}

fn estimate_criticality(query: &Query, ignorance: &Ignorance) -> f64 {
    let lower = query.text.to_lowercase();
    let keyword_hit = CRITICAL_KEYWORDS.iter().any(|k| lower.contains(k));
    let base = if keyword_hit { 0.85 } else { 0.2 + 0.3 * ignorance.score };
    base.clamp(0.0, 1.0)
}

fn evaluate_answer(query: &Query, answer: &str) -> f64 {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let refusal_markers = ["i cannot help", "i'm not able to", "as an ai", "sorry, i can't"];
    let lower_answer = trimmed.to_lowercase();
    if refusal_markers.iter().any(|m| lower_answer.contains(m)) {
        return 0.1;
    }

    let length_score = (trimmed.split_whitespace().count() as f64 / 30.0).min(1.0);
    let overlap_score = word_overlap(&query.text.to_lowercase(), &lower_answer);

    (0.5 * length_score + 0.5 * (0.3 + 0.7 * overlap_score)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::EpisodeStatus;

    fn backend(kind: BackendKind, caps: &[Capability]) -> BackendInfo {
        BackendInfo { kind, capabilities: caps.to_vec(), stochastic: false }
    }

    fn episode(routing_strategy: &str, quality: f64) -> Episode {
        Episode {
            id: crate::registry::new_id(),
            timestamp: chrono::Utc::now(),
            session_id: "s1".into(),
            user_id: None,
            query_text: "search for rust".into(),
            answer_text: "answer".into(),
            strategy_used: "simple".into(),
            routing_strategy: routing_strategy.into(),
            quality,
            latency_ms: 1,
            status: EpisodeStatus::Completed,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn empty_text_is_invalid_input() {
        let meta = MetaCognition::new(Strategy::Balanced);
        let query = Query::new("   ", Modality::Text);
        let err = meta.analyze(&query, &AnalysisContext::default()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn route_picks_image_backend_for_image_modality() {
        let meta = MetaCognition::new(Strategy::Balanced);
        let query = Query::new("what is in this image?", Modality::Image);
        let ctx = AnalysisContext {
            available_backends: vec![backend(BackendKind::ToolServer, &[Capability::ImageAnalyzer, Capability::Synthesize])],
            ..Default::default()
        };
        let state = meta.analyze(&query, &ctx).unwrap();
        let decision = meta.route(&state, &ctx.available_backends, &query.options);
        assert_eq!(decision.primary_backend, BackendKind::ToolServer);
        assert!(!decision.use_ensemble);
    }

    #[test]
    fn route_is_pure_given_identical_inputs() {
        let meta = MetaCognition::new(Strategy::Balanced);
        let query = Query::new("hello", Modality::Text);
        let ctx = AnalysisContext {
            available_backends: vec![backend(BackendKind::ToolServer, &[Capability::ConversationalResponder])],
            ..Default::default()
        };
        let state = meta.analyze(&query, &ctx).unwrap();
        let d1 = meta.route(&state, &ctx.available_backends, &query.options);
        let d2 = meta.route(&state, &ctx.available_backends, &query.options);
        assert_eq!(d1.primary_backend, d2.primary_backend);
        assert_eq!(d1.use_ensemble, d2.use_ensemble);
    }

    #[test]
    fn adaptive_strategy_resolves_to_highest_mean_quality() {
        let meta = MetaCognition::new(Strategy::Balanced);
        let mut query = Query::new("search for rust", Modality::Text);
        query.options.strategy_hint = Some("adaptive".to_string());
        let ctx = AnalysisContext {
            recent_episodes: vec![episode("conservative", 0.9), episode("exploratory", 0.2)],
            ..Default::default()
        };
        let state = meta.analyze(&query, &ctx).unwrap();
        assert_eq!(state.strategy, Strategy::Conservative);
    }

    #[test]
    fn adaptive_with_no_history_defaults_to_balanced() {
        let meta = MetaCognition::new(Strategy::Conservative);
        let mut query = Query::new("hello", Modality::Text);
        query.options.strategy_hint = Some("adaptive".to_string());
        let state = meta.analyze(&query, &AnalysisContext::default()).unwrap();
        assert_eq!(state.strategy, Strategy::Balanced);
    }

    #[test]
    fn evaluate_returns_low_score_for_empty_answer() {
        let meta = MetaCognition::new(Strategy::Balanced);
        let query = Query::new("hello", Modality::Text);
        assert_eq!(meta.evaluate(&query, ""), 0.0);
    }

    #[test]
    fn use_ensemble_requires_all_three_conditions() {
        let meta = MetaCognition::new(Strategy::Balanced);
        let mut query = Query::new("deploy migration now", Modality::Text);
        query.options.allow_ensemble = true;
        let ctx = AnalysisContext {
            available_backends: vec![
                backend(BackendKind::ToolServer, &[Capability::ConversationalResponder]),
                backend(BackendKind::LocalReasoner, &[]),
            ],
            ..Default::default()
        };
        let state = meta.analyze(&query, &ctx).unwrap();
        let decision = meta.route(&state, &ctx.available_backends, &query.options);
        assert!(state.criticality >= 0.7);
        if state.self_doubt.composite < 0.5 {
            assert!(decision.use_ensemble);
        }
    }
}
