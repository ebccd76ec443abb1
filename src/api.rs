//! REST API server for the command pipeline
//!
//! Exposes the pipeline's four operations to a presentation layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::audit::AuditFilter;
use crate::error::PipelineError;
use crate::models::ApprovalDecision;
use crate::pipeline::CommandPipeline;

/// =============================
/// Request Models
/// =============================

fn default_actor() -> String {
    "Admin User".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub text: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub outcome: ApprovalDecision,
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    #[serde(default = "default_actor")]
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub entity: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<CommandPipeline>,
}

fn error_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::PlanNotFound(_) | PipelineError::ApprovalNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::InvalidTransition { .. }
        | PipelineError::NotExecutable(_)
        | PipelineError::AlreadyExecuted(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Handlers
/// =============================

async fn submit_command(
    State(state): State<ApiState>,
    Json(req): Json<CommandRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(command = %req.text, "Received command");

    match state.pipeline.submit_command(&req.text, &req.actor).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn decide_approval(
    State(state): State<ApiState>,
    Path(approval_id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .pipeline
        .decide_approval(approval_id, req.outcome, &req.actor)
        .await
    {
        Ok(approval) => (StatusCode::OK, Json(ApiResponse::success(approval))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn revert_approval(
    State(state): State<ApiState>,
    Path(approval_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    match state
        .pipeline
        .revert_approval(approval_id, &req.actor)
        .await
    {
        Ok(approval) => (StatusCode::OK, Json(ApiResponse::success(approval))),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn execute_plan(
    State(state): State<ApiState>,
    Path(plan_id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.pipeline.execute_plan(plan_id, &req.actor).await {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        // Success-already-happened: the caller's intent is satisfied, so a
        // retried request is not an error.
        Err(PipelineError::AlreadyExecuted(id)) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "plan_id": id,
                "already_executed": true,
            }))),
        ),
        Err(e) => (error_status(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn query_audit(
    State(state): State<ApiState>,
    Query(query): Query<AuditQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let filter = AuditFilter {
        actor: query.actor,
        entity: query.entity,
        from: query.from,
        to: query.to,
    };

    let entries = state.pipeline.query_audit(&filter).await;
    (StatusCode::OK, Json(ApiResponse::success(entries)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<CommandPipeline>) -> Router {
    let state = ApiState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/api/command", post(submit_command))
        .route("/api/approvals/:id/decide", post(decide_approval))
        .route("/api/approvals/:id/revert", post(revert_approval))
        .route("/api/plans/:id/execute", post(execute_plan))
        .route("/api/audit", get(query_audit))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<CommandPipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
