//! HTTP/JSON route handlers (§6). Each handler is a thin translation layer:
//! extract, build a domain call, translate the result or `AppError` into the
//! response types in `schema` — the same translation the RPC surface reuses
//! (§6.1), so the two surfaces can never drift.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::consensus::OpenDecisionParams;
use crate::error::{AppError, AppResult};
use crate::planner::CreateGoalParams;
use crate::query::Query;

use super::schema::*;
use super::step_executor::ToolServerStepExecutor;
use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/query", post(submit_query))
        .route("/v1/status", get(get_status))
        .route("/v1/capabilities", get(get_capabilities))
        .route("/v1/planning/goals", post(create_goal))
        .route("/v1/planning/goals/{id}", get(get_goal))
        .route("/v1/planning/plans", post(create_plan))
        .route("/v1/planning/plans/{id}/execute", post(execute_plan))
        .route("/v1/sci/participants", post(register_participant))
        .route("/v1/sci/decisions", post(open_decision))
        .route("/v1/sci/votes", post(cast_vote))
        .route("/v1/sci/decisions/{id}/tally", post(tally_decision))
}

async fn submit_query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Result<Json<QueryResponse>, GatewayError> {
    Ok(Json(handle_submit_query(&state, req).await?))
}

pub async fn handle_submit_query(state: &AppState, req: QueryRequest) -> AppResult<QueryResponse> {
    let _permit = state
        .request_slots
        .clone()
        .try_acquire_owned()
        .map_err(|_| AppError::backend_unavailable("request queue is at capacity"))?;

    let query = Query {
        id: crate::registry::new_id(),
        text: req.query,
        modality: req.modality,
        attachments: req.attachments,
        user_id: req.user_id,
        session_id: req.session_id,
        options: req.options.unwrap_or_default(),
    };
    let result = state.orchestrator.process(query).await?;
    Ok(result.into())
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(handle_get_status(&state).await)
}

pub async fn handle_get_status(state: &AppState) -> StatusResponse {
    let tool_server_status = state.tool_server.health().await.map(health_status_label).unwrap_or("down");
    let local_reasoner_status = if state.local_reasoner.is_some() { Some("enabled".to_string()) } else { None };
    let in_flight = state.max_concurrent_requests.saturating_sub(state.request_slots.available_permits());

    StatusResponse {
        status: "ok".to_string(),
        backends: BackendHealth { tool_server: tool_server_status.to_string(), local_reasoner: local_reasoner_status },
        queue_depth: in_flight,
    }
}

async fn get_capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse { capabilities: state.capability_map.all() })
}

async fn create_goal(State(state): State<AppState>, Json(req): Json<CreateGoalRequest>) -> Result<Json<crate::planner::Goal>, GatewayError> {
    let params = CreateGoalParams {
        title: req.title,
        description: req.description,
        priority: req.priority,
        parent_id: req.parent_id,
        dependency_ids: req.dependency_ids,
        success_criteria: req.success_criteria,
    };
    let goal = state.planner.create_goal(params).await?;
    Ok(Json(goal))
}

async fn get_goal(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<crate::planner::Goal>, GatewayError> {
    state.planner.get_goal(&id).await.map(Json).ok_or_else(|| AppError::not_found(format!("unknown goal '{id}'")).into())
}

async fn create_plan(State(state): State<AppState>, Json(req): Json<CreatePlanRequest>) -> Result<Json<crate::planner::Plan>, GatewayError> {
    let plan = state.planner.create_plan(&req.goal_id, req.strategy).await?;
    Ok(Json(plan))
}

async fn execute_plan(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<ExecutePlanResponse>, GatewayError> {
    let executor = Arc::new(ToolServerStepExecutor::new(state.tool_server.clone()));
    state.planner.execute_plan(&id, executor).await?;
    let plan = state.planner.get_plan(&id).await.ok_or_else(|| AppError::internal("plan vanished mid-request"))?;
    Ok(Json(ExecutePlanResponse { plan_id: plan.id, status: plan.status, steps: plan.steps }))
}

async fn register_participant(State(state): State<AppState>, Json(req): Json<RegisterParticipantRequest>) -> Json<RegisterParticipantResponse> {
    let participant_id = state.consensus.register_participant(req.name, req.role, req.verified).await;
    Json(RegisterParticipantResponse { participant_id })
}

async fn open_decision(State(state): State<AppState>, Json(req): Json<OpenDecisionRequest>) -> Result<Json<OpenDecisionResponse>, GatewayError> {
    let decision_id = state
        .consensus
        .open_decision(OpenDecisionParams {
            title: req.title,
            description: req.description,
            decision_type: req.decision_type,
            criticality: req.criticality,
            recommended_option: req.recommended_option,
            required_roles: req.required_roles,
            consensus_type: req.consensus_type,
            deadline: chrono::Utc::now() + chrono::Duration::milliseconds(req.deadline_ms_from_now),
        })
        .await?;
    Ok(Json(OpenDecisionResponse { decision_id }))
}

async fn cast_vote(State(state): State<AppState>, Json(req): Json<CastVoteRequest>) -> Result<Json<TallyResponse>, GatewayError> {
    state.consensus.cast_vote(&req.decision_id, &req.participant_id, req.choice, req.rationale).await?;
    let outcome = state.consensus.tally(&req.decision_id).await?;
    Ok(Json(outcome.into()))
}

async fn tally_decision(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<TallyResponse>, GatewayError> {
    let outcome = state.consensus.tally(&id).await?;
    Ok(Json(outcome.into()))
}
