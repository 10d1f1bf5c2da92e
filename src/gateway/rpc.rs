//! JSON-RPC 2.0-shaped surface (§6.1): `POST /v1/rpc`, one method per HTTP
//! route, sharing the exact DTOs and business logic the HTTP handlers use so
//! the two surfaces can't drift from each other.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consensus::OpenDecisionParams;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::planner::CreateGoalParams;

use super::http::handle_get_status;
use super::schema::*;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Maps onto the standard JSON-RPC reserved ranges where they apply and
/// otherwise onto an application-defined range keyed by `ErrorKind` (§7).
fn rpc_code_for(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::InvalidInput => -32602,
        ErrorKind::NotFound => -32001,
        ErrorKind::Precondition => -32002,
        ErrorKind::Unauthorized => -32003,
        ErrorKind::BackendUnavailable => -32004,
        ErrorKind::Timeout => -32005,
        ErrorKind::Internal => -32603,
    }
}

fn app_error_to_rpc(err: AppError) -> RpcError {
    let message = if err.kind == ErrorKind::Internal { "an internal error occurred".to_string() } else { err.message };
    RpcError { code: rpc_code_for(err.kind), message, data: None }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/rpc", post(rpc_handler))
}

async fn rpc_handler(State(state): State<AppState>, Json(req): Json<RpcRequest>) -> Json<RpcResponse> {
    let id = req.id.clone();
    let result = dispatch(&state, &req.method, req.params).await;
    match result {
        Ok(value) => Json(RpcResponse { jsonrpc: jsonrpc_version(), id, result: Some(value), error: None }),
        Err(e) => Json(RpcResponse { jsonrpc: jsonrpc_version(), id, result: None, error: Some(app_error_to_rpc(e)) }),
    }
}

fn bad_params(e: serde_json::Error) -> AppError {
    AppError::invalid_input(format!("invalid params: {e}"))
}

async fn dispatch(state: &AppState, method: &str, params: Value) -> AppResult<Value> {
    match method {
        "query.submit" => {
            let req: QueryRequest = serde_json::from_value(params).map_err(bad_params)?;
            let resp = super::http::handle_submit_query(state, req).await?;
            Ok(serde_json::to_value(resp).map_err(AppError::internal)?)
        }
        "status.get" => {
            let resp = handle_get_status(state).await;
            Ok(serde_json::to_value(resp).map_err(AppError::internal)?)
        }
        "capabilities.get" => {
            let resp = CapabilitiesResponse { capabilities: state.capability_map.all() };
            Ok(serde_json::to_value(resp).map_err(AppError::internal)?)
        }
        "planning.goals.create" => {
            let req: CreateGoalRequest = serde_json::from_value(params).map_err(bad_params)?;
            let goal = state
                .planner
                .create_goal(CreateGoalParams {
                    title: req.title,
                    description: req.description,
                    priority: req.priority,
                    parent_id: req.parent_id,
                    dependency_ids: req.dependency_ids,
                    success_criteria: req.success_criteria,
                })
                .await?;
            Ok(serde_json::to_value(goal).map_err(AppError::internal)?)
        }
        "planning.goals.get" => {
            let id = params.get("id").and_then(Value::as_str).ok_or_else(|| AppError::invalid_input("missing 'id'"))?;
            let goal = state.planner.get_goal(id).await.ok_or_else(|| AppError::not_found(format!("unknown goal '{id}'")))?;
            Ok(serde_json::to_value(goal).map_err(AppError::internal)?)
        }
        "planning.plans.create" => {
            let req: CreatePlanRequest = serde_json::from_value(params).map_err(bad_params)?;
            let plan = state.planner.create_plan(&req.goal_id, req.strategy).await?;
            Ok(serde_json::to_value(plan).map_err(AppError::internal)?)
        }
        "planning.plans.execute" => {
            let id = params.get("id").and_then(Value::as_str).ok_or_else(|| AppError::invalid_input("missing 'id'"))?;
            let executor = std::sync::Arc::new(super::step_executor::ToolServerStepExecutor::new(state.tool_server.clone()));
            state.planner.execute_plan(id, executor).await?;
            let plan = state.planner.get_plan(id).await.ok_or_else(|| AppError::internal("plan vanished mid-request"))?;
            let resp = ExecutePlanResponse { plan_id: plan.id, status: plan.status, steps: plan.steps };
            Ok(serde_json::to_value(resp).map_err(AppError::internal)?)
        }
        "sci.participants.register" => {
            let req: RegisterParticipantRequest = serde_json::from_value(params).map_err(bad_params)?;
            let participant_id = state.consensus.register_participant(req.name, req.role, req.verified).await;
            Ok(serde_json::to_value(RegisterParticipantResponse { participant_id }).map_err(AppError::internal)?)
        }
        "sci.decisions.open" => {
            let req: OpenDecisionRequest = serde_json::from_value(params).map_err(bad_params)?;
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
            Ok(serde_json::to_value(OpenDecisionResponse { decision_id }).map_err(AppError::internal)?)
        }
        "sci.votes.cast" => {
            let req: CastVoteRequest = serde_json::from_value(params).map_err(bad_params)?;
            state.consensus.cast_vote(&req.decision_id, &req.participant_id, req.choice, req.rationale).await?;
            let outcome = state.consensus.tally(&req.decision_id).await?;
            Ok(serde_json::to_value(TallyResponse::from(outcome)).map_err(AppError::internal)?)
        }
        "sci.decisions.tally" => {
            let id = params.get("id").and_then(Value::as_str).ok_or_else(|| AppError::invalid_input("missing 'id'"))?;
            let outcome = state.consensus.tally(id).await?;
            Ok(serde_json::to_value(TallyResponse::from(outcome)).map_err(AppError::internal)?)
        }
        other => Err(AppError::invalid_input(format!("unknown method '{other}'"))),
    }
}
