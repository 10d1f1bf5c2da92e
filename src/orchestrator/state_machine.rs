//! Per-request state machine (§4.4). Purely observational: `Orchestrator`
//! advances through these states and logs each transition via `tracing`;
//! nothing here enforces the transitions structurally (doing so with a
//! typestate would cost more generics than six log lines are worth).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Classified,
    Analyzed,
    ConsensusPending,
    ConsensusApproved,
    ConsensusRejected,
    Dispatched,
    Evaluated,
    Refining,
    Persisted,
    Done,
    Error,
}

impl RequestState {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestState::Classified => "CLASSIFIED",
            RequestState::Analyzed => "ANALYZED",
            RequestState::ConsensusPending => "CONSENSUS_PENDING",
            RequestState::ConsensusApproved => "CONSENSUS_APPROVED",
            RequestState::ConsensusRejected => "CONSENSUS_REJECTED",
            RequestState::Dispatched => "DISPATCHED",
            RequestState::Evaluated => "EVALUATED",
            RequestState::Refining => "REFINING",
            RequestState::Persisted => "PERSISTED",
            RequestState::Done => "DONE",
            RequestState::Error => "ERROR",
        }
    }
}

/// Logs `query_id` moving from one state to another (§3.1 logging fields).
pub fn log_transition(query_id: &str, from: RequestState, to: RequestState) {
    tracing::debug!(query_id, from = from.as_str(), to = to.as_str(), "request state transition");
}
