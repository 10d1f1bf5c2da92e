//! `LocalReasoner` contract (§6): a local model plus retrieval and a
//! tool-using agent loop. Out of scope to implement for real; `StubLocalReasoner`
//! is a deterministic stand-in grounded on the teacher's `SmartMockProvider`
//! (`tests/e2e_scenarios.rs`) — canned answers keyed by substring match
//! against the query text, so scenario tests stay deterministic without a
//! live model.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalReasonerResult {
    pub answer: String,
    pub strategy: String,
    pub latency_ms: u64,
    pub diagnostics: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait LocalReasonerBackend: Send + Sync {
    async fn process(&self, query_text: &str, ctx: SessionContext) -> AppResult<LocalReasonerResult>;
    async fn stats(&self) -> HashMap<String, u64>;
}

pub struct StubLocalReasoner {
    canned: Vec<(String, String)>,
    calls: Mutex<u64>,
}

impl StubLocalReasoner {
    pub fn new() -> Self {
        Self { canned: Vec::new(), calls: Mutex::new(0) }
    }

    /// Registers a canned answer returned whenever `query_text` contains
    /// `needle` (case-insensitive), checked in registration order.
    pub fn with_canned(mut self, needle: impl Into<String>, answer: impl Into<String>) -> Self {
        self.canned.push((needle.into().to_lowercase(), answer.into()));
        self
    }
}

impl Default for StubLocalReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalReasonerBackend for StubLocalReasoner {
    async fn process(&self, query_text: &str, _ctx: SessionContext) -> AppResult<LocalReasonerResult> {
        *self.calls.lock().unwrap() += 1;
        let lower = query_text.to_lowercase();
        let answer = self
            .canned
            .iter()
            .find(|(needle, _)| lower.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| format!("Local reasoning over: {query_text}"));

        Ok(LocalReasonerResult { answer, strategy: "local_stub".to_string(), latency_ms: 5, diagnostics: None })
    }

    async fn stats(&self) -> HashMap<String, u64> {
        let mut m = HashMap::new();
        m.insert("calls".to_string(), *self.calls.lock().unwrap());
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_canned_answer_on_match() {
        let reasoner = StubLocalReasoner::new().with_canned("differentiation", "reverse-mode AD explanation");
        let result = reasoner
            .process("explain reverse-mode automatic differentiation", SessionContext::default())
            .await
            .unwrap();
        assert_eq!(result.answer, "reverse-mode AD explanation");
    }

    #[tokio::test]
    async fn tracks_call_count() {
        let reasoner = StubLocalReasoner::new();
        reasoner.process("hello", SessionContext::default()).await.unwrap();
        reasoner.process("world", SessionContext::default()).await.unwrap();
        assert_eq!(reasoner.stats().await.get("calls"), Some(&2));
    }
}
