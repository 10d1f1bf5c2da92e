//! Orchestrator loop (C1, §4.4): the single entry point the gateway calls.
//! Generalizes the teacher's `Orchestrator::run` turn loop
//! (`src/orchestrator/mod.rs`, since deleted from this tree) — classify,
//! consult a router, dispatch, evaluate, refine — into the component
//! pipeline this spec names: classify → analyze → consensus gate → select
//! workflow → evaluate/refine → persist.

mod ensemble;
mod state_machine;
mod workflow;

pub use state_machine::RequestState;
pub use workflow::WorkflowKind;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::backends::{
    BackendInfo, BackendKind, Capability, CapabilityMap, Episode, EpisodeStatus, LocalReasonerBackend, MemoryStore, SessionContext, ToolServer,
};
use crate::config::ConsensusDefaults;
use crate::consensus::{ConsensusEngine, ConsensusType, DecisionStatus, OpenDecisionParams, Role};
use crate::emit_event;
use crate::error::AppResult;
use crate::event_bus::OrchestratorEvent;
use crate::meta::{AnalysisContext, MetaCognition, Temporal};
use crate::query::Query;
use ensemble::Candidate;

/// How many consecutive quality drops during refinement abort the loop
/// early (§4.4, "refinement divergence").
const DIVERGENCE_ABORT_STREAK: u32 = 3;

/// Poll interval while a gated query waits on an open consensus decision.
const CONSENSUS_POLL_MS: u64 = 50;

#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub answer: String,
    pub quality: f64,
    pub strategy_used: String,
    pub iterations: u32,
    pub latency_ms: u64,
    pub diagnostics: Option<String>,
}

pub struct Orchestrator {
    meta: MetaCognition,
    consensus: Arc<ConsensusEngine>,
    tool_server: Arc<dyn ToolServer>,
    local_reasoner: Option<Arc<dyn LocalReasonerBackend>>,
    memory: Arc<dyn MemoryStore>,
    capability_map: CapabilityMap,
    consensus_defaults: ConsensusDefaults,
}

impl Orchestrator {
    pub fn new(
        meta: MetaCognition,
        consensus: Arc<ConsensusEngine>,
        tool_server: Arc<dyn ToolServer>,
        local_reasoner: Option<Arc<dyn LocalReasonerBackend>>,
        memory: Arc<dyn MemoryStore>,
        capability_map: CapabilityMap,
        consensus_defaults: ConsensusDefaults,
    ) -> Self {
        Self { meta, consensus, tool_server, local_reasoner, memory, capability_map, consensus_defaults }
    }

    fn available_backends(&self) -> Vec<BackendInfo> {
        let mut backends = vec![BackendInfo {
            kind: BackendKind::ToolServer,
            capabilities: vec![
                Capability::ConversationalResponder,
                Capability::Retriever,
                Capability::ImageAnalyzer,
                Capability::AudioTranscriber,
                Capability::Synthesize,
            ],
            stochastic: false,
        }];
        if self.local_reasoner.is_some() {
            backends.push(BackendInfo { kind: BackendKind::LocalReasoner, capabilities: vec![Capability::ConversationalResponder], stochastic: true });
        }
        backends
    }

    /// §4.4 end-to-end pipeline. Never panics: internal backend failures
    /// degrade to a zero-quality apology rather than propagating, except for
    /// caller input errors (empty query text), which are returned as-is.
    pub async fn process(&self, query: Query) -> AppResult<OrchestrationResult> {
        let started = Instant::now();
        let session_id = query.session_id.clone().unwrap_or_else(|| "default".to_string());

        let recent_episodes = self.memory.recent(Some(&session_id), 5).await.unwrap_or_default();
        let context = AnalysisContext { recent_episodes, available_backends: self.available_backends(), temporal: Temporal::default() };

        let state = self.meta.analyze(&query, &context)?;
        state_machine::log_transition(&query.id, RequestState::Classified, RequestState::Analyzed);

        if query.options.consensus_required || (state.criticality >= 0.75 && self.consensus.has_primary_user().await) {
            state_machine::log_transition(&query.id, RequestState::Analyzed, RequestState::ConsensusPending);
            if let Some(result) = self.gate_on_consensus(&query, state.criticality, started).await {
                return Ok(result);
            }
            state_machine::log_transition(&query.id, RequestState::ConsensusPending, RequestState::ConsensusApproved);
        }

        let decision = self.meta.route(&state, &context.available_backends, &query.options);
        let chosen_workflow = workflow::select_workflow(&query, &state, &decision);

        state_machine::log_transition(&query.id, RequestState::Analyzed, RequestState::Dispatched);
        let mut candidate = self.dispatch(chosen_workflow, &query, &decision).await;
        let mut iterations: u32 = 1;
        let mut best = candidate.clone();
        let mut consecutive_drops = 0u32;

        state_machine::log_transition(&query.id, RequestState::Dispatched, RequestState::Evaluated);

        while candidate.quality < query.options.quality_threshold && iterations < query.options.max_iterations {
            state_machine::log_transition(&query.id, RequestState::Evaluated, RequestState::Refining);
            emit_event!(OrchestratorEvent::RefinementIteration { query_id: query.id.clone(), iteration: iterations, quality: candidate.quality });

            let refined = self.refine(chosen_workflow, &query, &decision, &candidate).await;
            iterations += 1;

            if refined.quality < candidate.quality {
                consecutive_drops += 1;
            } else {
                consecutive_drops = 0;
            }
            if refined.quality > best.quality {
                best = refined.clone();
            }
            candidate = refined;
            state_machine::log_transition(&query.id, RequestState::Refining, RequestState::Evaluated);

            if consecutive_drops >= DIVERGENCE_ABORT_STREAK {
                tracing::warn!(query_id = %query.id, "refinement diverging, keeping best answer seen");
                candidate = best.clone();
                break;
            }
        }
        if candidate.quality < best.quality {
            candidate = best;
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        let episode = Episode {
            id: crate::registry::new_id(),
            timestamp: Utc::now(),
            session_id: session_id.clone(),
            user_id: query.user_id.clone(),
            query_text: query.text.clone(),
            answer_text: candidate.answer.clone(),
            strategy_used: chosen_workflow.as_str().to_string(),
            routing_strategy: crate::meta::strategy_tag(state.strategy).to_string(),
            quality: candidate.quality,
            latency_ms,
            status: EpisodeStatus::Completed,
            metadata: serde_json::Value::Null,
        };
        let episode_id = episode.id.clone();
        let episode_quality = episode.quality;
        if let Err(e) = self.memory.append(episode).await {
            tracing::warn!(query_id = %query.id, error = %e, "failed to persist episode, continuing");
        } else {
            emit_event!(OrchestratorEvent::EpisodeRecorded { episode_id, session_id, quality: episode_quality });
        }
        state_machine::log_transition(&query.id, RequestState::Evaluated, RequestState::Persisted);
        state_machine::log_transition(&query.id, RequestState::Persisted, RequestState::Done);

        Ok(OrchestrationResult {
            answer: candidate.answer,
            quality: candidate.quality,
            strategy_used: chosen_workflow.as_str().to_string(),
            iterations,
            latency_ms,
            diagnostics: None,
        })
    }

    /// Opens a decision gated on `criticality`/`consensus_required`, polls
    /// until it terminates or its deadline passes, and returns `Some(result)`
    /// with a zero-quality refusal if rejected/expired/timed out — `None`
    /// means the caller should proceed with dispatch.
    async fn gate_on_consensus(&self, query: &Query, criticality: f64, started: Instant) -> Option<OrchestrationResult> {
        let consensus_type = parse_consensus_type(&self.consensus_defaults.consensus_type);
        let deadline = Utc::now() + chrono::Duration::milliseconds(self.consensus_defaults.deadline_ms as i64);
        let decision_id = match self
            .consensus
            .open_decision(OpenDecisionParams {
                title: format!("proceed with query {}", query.id),
                description: query.text.clone(),
                decision_type: "query_execution".to_string(),
                criticality,
                recommended_option: Some("proceed".to_string()),
                required_roles: vec![Role::PrimaryUser, Role::Administrator],
                consensus_type,
                deadline,
            })
            .await
        {
            Ok(id) => id,
            Err(e) => {
                return Some(OrchestrationResult {
                    answer: "This request could not be gated for approval and was not executed.".to_string(),
                    quality: 0.0,
                    strategy_used: "consensus_gate_error".to_string(),
                    iterations: 0,
                    latency_ms: started.elapsed().as_millis() as u64,
                    diagnostics: Some(e.message),
                });
            }
        };

        loop {
            let outcome = match self.consensus.tally(&decision_id).await {
                Ok(o) => o,
                Err(_) => break,
            };
            if outcome.decided {
                if outcome.status == DecisionStatus::Approved {
                    return None;
                }
                // Consensus timeout is treated as REJECTED (§4.4 step 3): the
                // strategy is always `rejected_by_consensus`, with the
                // specific reason carried in diagnostics.
                let diagnostics = if outcome.status == DecisionStatus::Expired { "timeout".to_string() } else { outcome.rationale };
                return Some(OrchestrationResult {
                    answer: "This request requires approval that was not granted.".to_string(),
                    quality: 0.0,
                    strategy_used: "rejected_by_consensus".to_string(),
                    iterations: 0,
                    latency_ms: started.elapsed().as_millis() as u64,
                    diagnostics: Some(diagnostics),
                });
            }
            if Utc::now() > deadline {
                return Some(OrchestrationResult {
                    answer: "This request requires approval that was not granted in time.".to_string(),
                    quality: 0.0,
                    strategy_used: "rejected_by_consensus".to_string(),
                    iterations: 0,
                    latency_ms: started.elapsed().as_millis() as u64,
                    diagnostics: Some("timeout".to_string()),
                });
            }
            tokio::time::sleep(std::time::Duration::from_millis(CONSENSUS_POLL_MS)).await;
        }
        None
    }

    async fn dispatch(&self, workflow: WorkflowKind, query: &Query, decision: &crate::meta::RoutingDecision) -> Candidate {
        match workflow {
            WorkflowKind::Ensemble => self.dispatch_ensemble(query).await,
            WorkflowKind::Multimodal => self.dispatch_multimodal(query).await,
            WorkflowKind::Local => self.dispatch_with_fallback(query, BackendKind::LocalReasoner).await,
            WorkflowKind::Complex | WorkflowKind::Simple => self.dispatch_with_fallback(query, decision.primary_backend).await,
        }
    }

    /// Re-dispatches the same workflow with the previous answer appended as
    /// critique context, per the refine-loop step of §4.4.
    async fn refine(&self, workflow: WorkflowKind, query: &Query, decision: &crate::meta::RoutingDecision, previous: &Candidate) -> Candidate {
        let mut refined_query = query.clone();
        refined_query.text = format!(
            "{}\n\n[Previous answer scored {:.2}, below the required threshold. Revise and improve it.]\nPrevious answer: {}",
            query.text, previous.quality, previous.answer
        );
        let candidate = self.dispatch(workflow, &refined_query, decision).await;
        let quality = self.meta.evaluate(query, &candidate.answer);
        Candidate { quality, ..candidate }
    }

    async fn dispatch_ensemble(&self, query: &Query) -> Candidate {
        let tool_candidate = self.dispatch_with_fallback(query, BackendKind::ToolServer).await;
        let local_candidate = self.dispatch_with_fallback(query, BackendKind::LocalReasoner).await;
        ensemble::combine(self.tool_server.as_ref(), &self.meta, query, tool_candidate, local_candidate).await
    }

    async fn dispatch_multimodal(&self, query: &Query) -> Candidate {
        let capability = workflow::multimodal_capability(query.modality);
        match self.capability_map.resolve(&capability) {
            Ok(tool_name) => {
                let params = serde_json::json!({ "attachments": query.attachments, "text": query.text });
                match self.tool_server.call_tool(tool_name, params).await {
                    Ok(result) if result.success => {
                        let answer = result.result.and_then(|v| v.get("answer").and_then(|a| a.as_str().map(str::to_string))).unwrap_or_default();
                        let quality = self.meta.evaluate(query, &answer);
                        Candidate { answer, quality, source: "tool_server".to_string() }
                    }
                    _ => self.apology(),
                }
            }
            Err(_) => self.apology(),
        }
    }

    /// Tool server first, local reasoner next, canned apology last (§4.4
    /// backend-unavailable fallback ordering).
    async fn dispatch_with_fallback(&self, query: &Query, preferred: BackendKind) -> Candidate {
        let order: [BackendKind; 2] = match preferred {
            BackendKind::ToolServer => [BackendKind::ToolServer, BackendKind::LocalReasoner],
            BackendKind::LocalReasoner => [BackendKind::LocalReasoner, BackendKind::ToolServer],
        };

        for kind in order {
            match kind {
                BackendKind::ToolServer => {
                    let capability = Capability::ConversationalResponder;
                    if let Ok(tool_name) = self.capability_map.resolve(&capability) {
                        let params = serde_json::json!({ "text": query.text });
                        if let Ok(result) = self.tool_server.call_tool(tool_name, params).await {
                            if result.success {
                                let answer = result
                                    .result
                                    .and_then(|v| v.get("answer").and_then(|a| a.as_str().map(str::to_string)))
                                    .unwrap_or_else(|| "Acknowledged.".to_string());
                                let quality = self.meta.evaluate(query, &answer);
                                return Candidate { answer, quality, source: "tool_server".to_string() };
                            }
                        }
                    }
                }
                BackendKind::LocalReasoner => {
                    if let Some(reasoner) = &self.local_reasoner {
                        let ctx = SessionContext { user_id: query.user_id.clone(), session_id: query.session_id.clone() };
                        if let Ok(result) = reasoner.process(&query.text, ctx).await {
                            let quality = self.meta.evaluate(query, &result.answer);
                            return Candidate { answer: result.answer, quality, source: "local_reasoner".to_string() };
                        }
                    }
                }
            }
        }
        self.apology()
    }

    fn apology(&self) -> Candidate {
        Candidate { answer: "I'm not able to help with that right now.".to_string(), quality: 0.0, source: "fallback_apology".to_string() }
    }
}

fn parse_consensus_type(raw: &str) -> ConsensusType {
    match raw.to_uppercase().as_str() {
        "WEIGHTED" => ConsensusType::Weighted,
        "SIMPLE_MAJORITY" => ConsensusType::SimpleMajority,
        "SUPERMAJORITY" => ConsensusType::Supermajority,
        "UNANIMOUS" => ConsensusType::Unanimous,
        _ => ConsensusType::Adaptive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryToolServer, StubLocalReasoner, ToolCallResult};
    use crate::config::RoleWeights;
    use crate::meta::Strategy;
    use crate::query::Modality;
    use tempfile::tempdir;

    async fn build(tool_server: Arc<dyn ToolServer>, consensus_defaults: ConsensusDefaults) -> (Orchestrator, Arc<ConsensusEngine>) {
        let consensus = Arc::new(ConsensusEngine::new(RoleWeights::default()));
        let dir = tempdir().unwrap();
        let memory = crate::backends::JsonlMemoryStore::open(dir.path().join("mem.jsonl"), 24, 0.75).await.unwrap();
        let orchestrator = Orchestrator::new(
            MetaCognition::new(Strategy::Balanced),
            consensus.clone(),
            tool_server,
            Some(Arc::new(StubLocalReasoner::new())),
            memory,
            CapabilityMap::default_mapping(),
            consensus_defaults,
        );
        (orchestrator, consensus)
    }

    #[tokio::test]
    async fn scenario_1_trivial_greeting_is_answered_without_refinement() {
        let server = InMemoryToolServer::new(&["conversational_responder", "synthesize"]);
        server.queue_response(
            "conversational_responder",
            ToolCallResult { success: true, result: Some(serde_json::json!({"answer": "Hello! How can I help you today?"})), error: None, latency_ms: 2 },
        );
        let (orchestrator, _consensus) = build(Arc::new(server), ConsensusDefaults::default()).await;

        let query = Query::new("hello", Modality::Text);
        let result = orchestrator.process(query).await.unwrap();
        assert_eq!(result.iterations, 1);
        assert!(!result.answer.is_empty());
    }

    #[tokio::test]
    async fn empty_query_text_propagates_invalid_input() {
        let server = InMemoryToolServer::new(&["conversational_responder"]);
        let (orchestrator, _consensus) = build(Arc::new(server), ConsensusDefaults::default()).await;
        let query = Query::new("   ", Modality::Text);
        let err = orchestrator.process(query).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn scenario_5_consensus_times_out_with_zero_votes_and_refuses() {
        let server = InMemoryToolServer::new(&["conversational_responder", "synthesize"]);
        let mut cfg = ConsensusDefaults::default();
        cfg.deadline_ms = 80;
        let (orchestrator, consensus) = build(Arc::new(server), cfg).await;
        consensus.register_participant("alice", Role::PrimaryUser, true).await;

        let mut query = Query::new("please approve and proceed with a production deploy migration now", Modality::Text);
        query.options.consensus_required = true;

        let result = orchestrator.process(query).await.unwrap();
        assert_eq!(result.quality, 0.0);
        assert_eq!(result.strategy_used, "rejected_by_consensus");
        assert_eq!(result.diagnostics.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn no_primary_user_registered_skips_the_consensus_gate() {
        let server = InMemoryToolServer::new(&["conversational_responder", "synthesize"]);
        server.queue_response(
            "conversational_responder",
            ToolCallResult { success: true, result: Some(serde_json::json!({"answer": "Proceeding with the requested deployment now."})), error: None, latency_ms: 2 },
        );
        let (orchestrator, _consensus) = build(Arc::new(server), ConsensusDefaults::default()).await;

        // criticality >= 0.75 would normally gate this query, but no
        // PRIMARY_USER is registered, so the gate condition never fires.
        let query = Query::new("please proceed with a production deploy migration now", Modality::Text);
        let result = orchestrator.process(query).await.unwrap();
        assert_ne!(result.strategy_used, "timeout");
        assert_ne!(result.strategy_used, "rejected_by_consensus");
    }
}
