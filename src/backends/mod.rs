//! External collaborator contracts (§1, §6): the remote tool server, the
//! local generative-model subsystem, and the hierarchical memory store.
//! These are *out of scope* to implement for real — the crate only owns the
//! trait boundary plus a reference/test-grade implementation of each,
//! exactly as `rust_agency`'s `LLMProvider`/`Memory`/`TaskQueue` traits
//! (`src/agent/provider.rs`, `src/memory/mod.rs`, `src/orchestrator/queue.rs`)
//! are thin `async_trait` boundaries in front of swappable backends.

mod capability;
mod local_reasoner;
mod memory_store;
mod tool_server;

pub use capability::{Capability, CapabilityMap};
pub use local_reasoner::{LocalReasonerBackend, LocalReasonerResult, StubLocalReasoner};
pub use memory_store::{ConsolidateResult, Episode, JsonlMemoryStore, MemoryStore};
pub use tool_server::{HealthStatus, HttpToolServer, InMemoryToolServer, ToolCallResult, ToolServer};

use serde::{Deserialize, Serialize};

/// Which collaborator a capability is advertised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    ToolServer,
    LocalReasoner,
}

/// A backend's advertised capabilities, as consulted by `MetaCognition` and
/// `Orchestrator` when deciding where to route (§4.1, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub capabilities: Vec<Capability>,
    /// Whether this backend's answers vary run-to-run given the same input —
    /// feeds the `ALEATORY` ignorance classification (§4.1).
    pub stochastic: bool,
}
