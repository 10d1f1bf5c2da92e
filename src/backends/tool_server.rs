//! `ToolServer` contract (§6): `list_tools`, `call_tool`, `health`.
//!
//! `HttpToolServer` is the real transport (`reqwest`, matching the teacher's
//! own use of `reqwest` for `WebSearchTool`, `src/tools/web_search.rs`).
//! `InMemoryToolServer` is a constructor-injectable fake for tests, grounded
//! on the teacher's `SmartMockProvider` (`tests/e2e_scenarios.rs`): canned
//! responses keyed by tool name, no network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

#[async_trait]
pub trait ToolServer: Send + Sync {
    async fn list_tools(&self) -> AppResult<Vec<ToolDescriptor>>;
    async fn call_tool(&self, name: &str, params: Value) -> AppResult<ToolCallResult>;
    async fn health(&self) -> AppResult<HealthStatus>;
}

/// `reqwest`-backed client for a remote tool server exposing a conventional
/// `POST /tools/{name}/call`, `GET /tools`, `GET /health` surface.
pub struct HttpToolServer {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpToolServer {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl ToolServer for HttpToolServer {
    async fn list_tools(&self) -> AppResult<Vec<ToolDescriptor>> {
        let url = format!("{}/tools", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::backend_unavailable(format!("tool server unreachable: {e}")))?;
        resp.json::<Vec<ToolDescriptor>>()
            .await
            .map_err(|e| AppError::backend_unavailable(format!("malformed tool list: {e}")))
    }

    async fn call_tool(&self, name: &str, params: Value) -> AppResult<ToolCallResult> {
        let url = format!("{}/tools/{}/call", self.base_url, name);
        let started = std::time::Instant::now();
        let resp = self
            .client
            .post(&url)
            .json(&params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AppError::backend_unavailable(format!("tool call failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::not_found(format!("tool '{name}' not found")));
        }

        let mut result: ToolCallResult = resp
            .json()
            .await
            .map_err(|e| AppError::backend_unavailable(format!("malformed tool response: {e}")))?;
        if result.latency_ms == 0 {
            result.latency_ms = started.elapsed().as_millis() as u64;
        }
        Ok(result)
    }

    async fn health(&self) -> AppResult<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => Ok(HealthStatus::Ok),
            Ok(_) => Ok(HealthStatus::Degraded),
            Err(_) => Ok(HealthStatus::Down),
        }
    }
}

/// Deterministic in-process fake: responses are keyed by tool name and
/// consumed in FIFO order, falling back to a success echo when exhausted.
pub struct InMemoryToolServer {
    tools: Vec<ToolDescriptor>,
    responses: Mutex<HashMap<String, Vec<ToolCallResult>>>,
}

impl InMemoryToolServer {
    pub fn new(tool_names: &[&str]) -> Self {
        let tools = tool_names
            .iter()
            .map(|n| ToolDescriptor { name: n.to_string(), description: String::new(), parameters_schema: Value::Null })
            .collect();
        Self { tools, responses: Mutex::new(HashMap::new()) }
    }

    pub fn queue_response(&self, tool: &str, result: ToolCallResult) {
        self.responses.lock().unwrap().entry(tool.to_string()).or_default().push(result);
    }
}

#[async_trait]
impl ToolServer for InMemoryToolServer {
    async fn list_tools(&self) -> AppResult<Vec<ToolDescriptor>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, params: Value) -> AppResult<ToolCallResult> {
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(AppError::not_found(format!("tool '{name}' not found")));
        }
        let mut responses = self.responses.lock().unwrap();
        if let Some(queue) = responses.get_mut(name) {
            if !queue.is_empty() {
                return Ok(queue.remove(0));
            }
        }
        Ok(ToolCallResult {
            success: true,
            result: Some(serde_json::json!({ "echo": params })),
            error: None,
            latency_ms: 1,
        })
    }

    async fn health(&self) -> AppResult<HealthStatus> {
        Ok(HealthStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let server = InMemoryToolServer::new(&["synthesize"]);
        let err = server.call_tool("missing_tool", Value::Null).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn queued_response_is_returned_in_order() {
        let server = InMemoryToolServer::new(&["synthesize"]);
        server.queue_response(
            "synthesize",
            ToolCallResult { success: true, result: Some(serde_json::json!("first")), error: None, latency_ms: 5 },
        );
        let result = server.call_tool("synthesize", Value::Null).await.unwrap();
        assert_eq!(result.result, Some(serde_json::json!("first")));
    }
}
