//! Pipeline services

pub mod annotation;
pub mod checkpoint_scanner;
pub mod consensus;
pub mod job_registry;
pub mod pipeline_orchestrator;
pub mod stage_runner;
pub mod swath_windows;

pub use job_registry::{JobRegistry, JobStatus};
pub use pipeline_orchestrator::{PipelineJob, PipelineOrchestrator, PipelineOutcome, PipelineStatus, Stage};
pub use stage_runner::{CommandExecutor, ProcessExecutor, StageRunner};
