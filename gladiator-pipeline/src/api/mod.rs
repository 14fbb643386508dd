//! HTTP API handlers for gladiator-pipeline

pub mod health;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::pipeline_events;
