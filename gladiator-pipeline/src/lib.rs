//! gladiator-pipeline library interface
//!
//! DIA proteomics pipeline: job registry, checkpointed stage orchestration,
//! external tool execution and peptide annotation. The HTTP adapter
//! (`gladiator-server`) and the one-shot runner (`gladiator`) are thin
//! layers over [`services::JobRegistry`] and [`services::PipelineOrchestrator`].

pub mod api;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult, PipelineError, RegistryError};

use axum::Router;
use chrono::{DateTime, Utc};
use gladiator_common::config::TomlConfig;
use gladiator_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::JobRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Running jobs, their progress and notifications
    pub registry: JobRegistry,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service configuration
    pub settings: Arc<TomlConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(registry: JobRegistry, settings: TomlConfig) -> Self {
        Self {
            event_bus: registry.event_bus().clone(),
            registry,
            settings: Arc::new(settings),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember `err` for the health endpoint and hand it back
    pub async fn record_error(&self, err: ApiError) -> ApiError {
        *self.last_error.write().await = Some(err.to_string());
        err
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .route("/events", get(api::pipeline_events))
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // The web UI is served from another origin
        .layer(CorsLayer::permissive())
}
