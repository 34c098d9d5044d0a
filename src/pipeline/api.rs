use std::sync::Arc;

use appforge_common::{BuildJob, JobId};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::launcher::JobLauncher;
use super::runner::PipelineRunner;
use super::store::JobStore;
use crate::errors::{LaunchError, StoreError};

const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: JobStore,
    pub launcher: JobLauncher,
    pub runner: Arc<PipelineRunner>,
    pub auto_build_default: bool,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub owner_id: String,
    pub auto_build: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    pub owner_id: String,
    pub limit: Option<u32>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            other => {
                tracing::error!(error = %other, "Store error");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<LaunchError> for ApiError {
    fn from(err: LaunchError) -> Self {
        match err {
            e if e.is_validation() => ApiError::BadRequest(e.to_string()),
            LaunchError::RunnerUnavailable => {
                ApiError::Unavailable(LaunchError::RunnerUnavailable.to_string())
            }
            LaunchError::Store(e) => e.into(),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/jobs", get(list_jobs).post(create_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/resume", post(resume_job))
        .route("/health", get(health_check))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    // An id that cannot exist is reported like any other unknown job.
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("Build job {} not found", raw)))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_job(
    State(state): State<SharedState>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let auto_build = req.auto_build.unwrap_or(state.auto_build_default);
    let job_id = state
        .launcher
        .launch(&req.prompt, &req.owner_id, auto_build)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id })))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<BuildJob>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.store.get(id).await?))
}

async fn resume_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&id)?;
    state.runner.resume(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_jobs(
    State(state): State<SharedState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<BuildJob>>, ApiError> {
    let owner_id = query.owner_id.trim();
    if owner_id.is_empty() {
        return Err(ApiError::BadRequest("owner_id is required".into()));
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.store.list_for_owner(owner_id, limit).await?))
}
