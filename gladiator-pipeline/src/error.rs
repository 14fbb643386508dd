//! Error types for gladiator-pipeline
//!
//! - [`PipelineError`]: why a job (or one of its stages) stopped
//! - [`RegistryError`]: why a control operation was refused
//! - [`ApiError`]: HTTP mapping of both

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline failure taxonomy
///
/// Any of these aborts the remaining stages of the job. Nothing is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rerun requested but the job directory has no config.txt
    #[error("Configuration not found: {0}")]
    ConfigurationMissing(PathBuf),

    /// Mixed or unknown input file extensions
    #[error("Unsupported input format: {0}")]
    UnsupportedInputFormat(String),

    /// The external program could not be launched
    #[error("External tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    /// Neither msconvert nor ThermoRawFileParser is installed, even after
    /// the installer ran
    #[error("No RAW file converter available")]
    NoConverterAvailable,

    /// The external program exited with a non-zero status
    #[error("Command failed with exit code {exit_code}: {command}")]
    StageExecutionFailed { command: String, exit_code: i32 },

    /// The job's cancellation token was set
    #[error("Cancelled")]
    Cancelled,

    /// Unparseable mzML, TSV or FASTA input, or an impossible stage result
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] gladiator_common::Error),
}

impl PipelineError {
    /// `{cmd, returncode}` pair recorded into the failing stage's progress
    pub fn command_and_code(&self) -> (String, i32) {
        match self {
            PipelineError::StageExecutionFailed { command, exit_code } => {
                (command.clone(), *exit_code)
            }
            PipelineError::Cancelled => ("Killed".to_string(), -1),
            other => (other.to_string(), -1),
        }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::MalformedInput(err.to_string())
    }
}

impl From<quick_xml::Error> for PipelineError {
    fn from(err: quick_xml::Error) -> Self {
        PipelineError::MalformedInput(err.to_string())
    }
}

/// Registry control operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Job already running, or its folder already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    /// Job names must be a single path component
    #[error("Invalid job name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., job already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Conflict(msg) => ApiError::Conflict(msg),
            RegistryError::NotFound(msg) => ApiError::NotFound(msg),
            RegistryError::InvalidName(msg) => ApiError::BadRequest(msg),
            RegistryError::Pipeline(PipelineError::ConfigurationMissing(path)) => {
                ApiError::NotFound(format!("Configuration not found: {}", path.display()))
            }
            RegistryError::Pipeline(e) => ApiError::Internal(e.to_string()),
            RegistryError::Io(e) => ApiError::Io(e),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::from(RegistryError::Pipeline(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "Status": "Failed",
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
