//! Job control API handlers
//!
//! POST /run, POST /rerun, POST /cancel_analysis, GET /get_status,
//! GET /get_progress, GET /get_notifications, POST /load_config,
//! GET /list_projects, POST /remove_analysisrun, GET /scan/:name,
//! POST /tsv_headers

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use gladiator_common::events::Notification;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ApiError, ApiResult};
use crate::models::{JobConfig, ProgressSnapshot};
use crate::services::checkpoint_scanner::JobScan;
use crate::services::job_registry::{JobStatus, ProjectSummary};
use crate::AppState;

const SUCCESS: &str = "Success";

/// Body-less success acknowledgement
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(rename = "Status")]
    pub status: &'static str,
}

impl StatusResponse {
    fn success() -> Json<Self> {
        Json(Self { status: SUCCESS })
    }
}

/// POST /run response
#[derive(Debug, Serialize)]
pub struct RunResponse {
    #[serde(rename = "Status")]
    pub status: &'static str,
    pub analysis_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub analysis_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub project: String,
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub folder: String,
}

#[derive(Debug, Deserialize)]
pub struct TsvHeadersRequest {
    pub file: String,
}

/// GET /get_status response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(rename = "Status")]
    pub status: &'static str,
    pub jobs: BTreeMap<String, JobStatus>,
}

/// POST /load_config response
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    #[serde(rename = "Status")]
    pub status: &'static str,
    pub config: JobConfig,
}

/// POST /run
///
/// Creates the job folder from `analysis_name` (suffixed with a timestamp
/// when taken) and starts the pipeline.
pub async fn run(
    State(state): State<AppState>,
    Json(config): Json<JobConfig>,
) -> ApiResult<Json<RunResponse>> {
    let requested = config.analysis_name.clone();
    match state.registry.start(Some(&requested), config) {
        Ok(analysis_name) => Ok(Json(RunResponse {
            status: SUCCESS,
            analysis_name,
        })),
        Err(e) => Err(state.record_error(e.into()).await),
    }
}

/// POST /rerun
pub async fn rerun(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<Json<StatusResponse>> {
    match state.registry.rerun(&request.analysis_name) {
        Ok(()) => Ok(StatusResponse::success()),
        Err(e) => Err(state.record_error(e.into()).await),
    }
}

/// POST /cancel_analysis
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.registry.cancel(&request.project)?;
    Ok(StatusResponse::success())
}

/// GET /get_status
pub async fn get_status(State(state): State<AppState>) -> Json<JobStatusResponse> {
    Json(JobStatusResponse {
        status: SUCCESS,
        jobs: state.registry.status(),
    })
}

/// GET /get_progress
pub async fn get_progress(State(state): State<AppState>) -> Json<BTreeMap<String, ProgressSnapshot>> {
    Json(state.registry.progress())
}

/// GET /get_notifications
///
/// Returns and clears the pending notifications.
pub async fn get_notifications(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.registry.drain_notifications())
}

/// POST /load_config
pub async fn load_config(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<Json<ConfigResponse>> {
    let config = state.registry.load_config(&request.analysis_name)?;
    Ok(Json(ConfigResponse {
        status: SUCCESS,
        config,
    }))
}

/// GET /list_projects
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<ProjectSummary>>> {
    Ok(Json(state.registry.list_jobs()?))
}

/// POST /remove_analysisrun
pub async fn remove_analysisrun(
    State(state): State<AppState>,
    Json(request): Json<RemoveRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.registry.remove_job(&request.folder)?;
    Ok(StatusResponse::success())
}

/// GET /scan/:name
pub async fn scan(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<JobScan>> {
    Ok(Json(state.registry.scan(&name)?))
}

/// POST /tsv_headers
///
/// Column names of a tab-separated file, resolved against the result root.
pub async fn tsv_headers(
    State(state): State<AppState>,
    Json(request): Json<TsvHeadersRequest>,
) -> ApiResult<Json<Vec<String>>> {
    let path = state.registry.result_root().join(&request.file);
    if !path.is_file() {
        return Err(ApiError::NotFound(request.file));
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    Ok(Json(headers))
}

/// Build job control routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/run", post(run))
        .route("/rerun", post(rerun))
        .route("/cancel_analysis", post(cancel_analysis))
        .route("/get_status", get(get_status))
        .route("/get_progress", get(get_progress))
        .route("/get_notifications", get(get_notifications))
        .route("/load_config", post(load_config))
        .route("/list_projects", get(list_projects))
        .route("/remove_analysisrun", post(remove_analysisrun))
        .route("/scan/:name", get(scan))
        .route("/tsv_headers", post(tsv_headers))
}
