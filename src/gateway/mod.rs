//! API gateway (C8, §4.5): ingress, schema validation, rate limiting, and
//! the two equivalent surfaces named in §6. Built with `axum` exactly as the
//! teacher's `src/server.rs` assembles its `Router` and `AppState`, with
//! `ServerError`-style typed error responses generalized into the §7
//! `AppError` kind → envelope mapping (`schema::GatewayError`).

mod http;
mod rpc;
mod schema;
mod step_executor;

pub use schema::{ErrorEnvelope, GatewayError};

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::backends::{CapabilityMap, LocalReasonerBackend, ToolServer};
use crate::consensus::ConsensusEngine;
use crate::error::AppError;
use crate::feature_flags::FeatureFlags;
use crate::orchestrator::Orchestrator;
use crate::planner::StrategicPlanner;
use crate::safety::CallerRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub consensus: Arc<ConsensusEngine>,
    pub planner: Arc<StrategicPlanner>,
    pub tool_server: Arc<dyn ToolServer>,
    pub local_reasoner: Option<Arc<dyn LocalReasonerBackend>>,
    pub capability_map: Arc<CapabilityMap>,
    pub feature_flags: Arc<FeatureFlags>,
    pub rate_limiter: Arc<CallerRateLimiter>,
    pub request_slots: Arc<tokio::sync::Semaphore>,
    pub max_concurrent_requests: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(http::routes())
        .merge(rpc::routes())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, listen_address: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    tracing::info!(address = %listen_address, "gateway listening");
    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Per-caller token bucket ahead of schema validation (§4.5, §9.1):
/// identifies the caller from `X-Caller-Id` (falling back to `anonymous` for
/// unauthenticated callers sharing one bucket) and rejects over-quota
/// requests before the body is ever deserialized.
async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let caller_id = request
        .headers()
        .get("x-caller-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    if state.rate_limiter.check(&caller_id).await {
        next.run(request).await
    } else {
        let retry_after = state.rate_limiter.retry_after_secs(&caller_id).await;
        let envelope = ErrorEnvelope {
            code: AppError::backend_unavailable("rate limit exceeded").kind.as_str(),
            message: "rate limit exceeded".to_string(),
            retry_after: Some(retry_after),
        };
        (StatusCode::TOO_MANY_REQUESTS, axum::Json(envelope)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{CapabilityMap as CapMap, InMemoryToolServer, JsonlMemoryStore, StubLocalReasoner};
    use crate::config::{ConsensusDefaults, RoleWeights};
    use crate::meta::{MetaCognition, Strategy};
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        test_state_with_burst(50).await
    }

    async fn test_state_with_burst(burst: u32) -> AppState {
        let tool_server: Arc<dyn ToolServer> = Arc::new(InMemoryToolServer::new(&["conversational_responder", "synthesize"]));
        let consensus = Arc::new(ConsensusEngine::new(RoleWeights::default()));
        let dir = tempfile::tempdir().unwrap();
        let memory = JsonlMemoryStore::open(dir.path().join("mem.jsonl"), 24, 0.75).await.unwrap();
        let capability_map = Arc::new(CapMap::default_mapping());
        let orchestrator = Arc::new(Orchestrator::new(
            MetaCognition::new(Strategy::Balanced),
            consensus.clone(),
            tool_server.clone(),
            Some(Arc::new(StubLocalReasoner::new())),
            memory,
            (*capability_map).clone(),
            ConsensusDefaults::default(),
        ));
        let flags_dir = tempfile::tempdir().unwrap();
        let feature_flags = Arc::new(FeatureFlags::new(flags_dir.path().join("flags.json"), Default::default()));

        AppState {
            orchestrator,
            consensus,
            planner: Arc::new(StrategicPlanner::new(2)),
            tool_server,
            local_reasoner: Some(Arc::new(StubLocalReasoner::new())),
            capability_map,
            feature_flags,
            rate_limiter: Arc::new(CallerRateLimiter::new(600, burst)),
            request_slots: Arc::new(tokio::sync::Semaphore::new(8)),
            max_concurrent_requests: 8,
        }
    }

    #[tokio::test]
    async fn status_route_reports_ok() {
        let app = build_router(test_state().await);
        let response = app.oneshot(HttpRequest::builder().uri("/v1/status").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn capabilities_route_lists_default_tags() {
        let app = build_router(test_state().await);
        let response = app.oneshot(HttpRequest::builder().uri("/v1/capabilities").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn over_quota_caller_gets_429() {
        let state = test_state_with_burst(1).await;
        state.rate_limiter.check("flooder").await;
        let app = build_router(state);
        let request = HttpRequest::builder().uri("/v1/status").header("x-caller-id", "flooder").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn rpc_unknown_method_returns_json_rpc_error() {
        let app = build_router(test_state().await);
        let body = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "nope.nope", "params": {}});
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/v1/rpc")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("error").is_some());
    }
}
