//! Request/response DTOs for both gateway surfaces (§6, §4.5) and the
//! `AppError` → client envelope mapping. HTTP and RPC share these types so
//! the two surfaces stay schema-equivalent, per §6.1.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::backends::HealthStatus;
use crate::error::{AppError, ErrorKind};
use crate::planner::{Priority, Step};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub options: Option<crate::query::QueryOptions>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default = "default_modality")]
    pub modality: crate::query::Modality,
}

fn default_modality() -> crate::query::Modality {
    crate::query::Modality::Text
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub quality: f64,
    pub strategy_used: String,
    pub iterations: u32,
    pub latency_ms: u64,
    pub diagnostics: Option<String>,
}

impl From<crate::orchestrator::OrchestrationResult> for QueryResponse {
    fn from(r: crate::orchestrator::OrchestrationResult) -> Self {
        Self { answer: r.answer, quality: r.quality, strategy_used: r.strategy_used, iterations: r.iterations, latency_ms: r.latency_ms, diagnostics: r.diagnostics }
    }
}

#[derive(Debug, Serialize)]
pub struct BackendHealth {
    pub tool_server: String,
    pub local_reasoner: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub backends: BackendHealth,
    pub queue_depth: usize,
}

pub fn health_status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "ok",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Down => "down",
    }
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub capabilities: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    pub title: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub dependency_ids: Vec<String>,
    pub success_criteria: Vec<String>,
}

fn default_priority() -> Priority {
    Priority::Medium
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub goal_id: String,
    pub strategy: crate::planner::PlanStrategy,
}

#[derive(Debug, Serialize)]
pub struct ExecutePlanResponse {
    pub plan_id: String,
    pub status: crate::planner::PlanStatus,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterParticipantRequest {
    pub name: String,
    pub role: crate::consensus::Role,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct RegisterParticipantResponse {
    pub participant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenDecisionRequest {
    pub title: String,
    pub description: String,
    pub decision_type: String,
    pub criticality: f64,
    pub recommended_option: Option<String>,
    pub required_roles: Vec<crate::consensus::Role>,
    pub consensus_type: crate::consensus::ConsensusType,
    pub deadline_ms_from_now: i64,
}

#[derive(Debug, Serialize)]
pub struct OpenDecisionResponse {
    pub decision_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub decision_id: String,
    pub participant_id: String,
    pub choice: crate::consensus::Choice,
    pub rationale: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TallyResponse {
    pub decided: bool,
    pub status: crate::consensus::DecisionStatus,
    pub rationale: String,
}

impl From<crate::consensus::TallyOutcome> for TallyResponse {
    fn from(o: crate::consensus::TallyOutcome) -> Self {
        Self { decided: o.decided, status: o.status, rationale: o.rationale }
    }
}

/// Stable client-facing envelope (§7): never carries internal diagnostics
/// text, only the stable kind-derived `code` and a short `message`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

pub struct GatewayError(pub AppError);

impl From<AppError> for GatewayError {
    fn from(err: AppError) -> Self {
        GatewayError(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Precondition => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let kind = self.0.kind;
        let status = status_for(kind);
        // INTERNAL diagnostics never reach the caller; everything else's
        // `message` is already written to be caller-safe at the boundary.
        let message = if kind == ErrorKind::Internal { "an internal error occurred".to_string() } else { self.0.message };
        let retry_after = matches!(kind, ErrorKind::BackendUnavailable | ErrorKind::Timeout).then_some(5);
        (status, Json(ErrorEnvelope { code: kind.as_str(), message, retry_after })).into_response()
    }
}
