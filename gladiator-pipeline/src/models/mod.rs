//! Data models for gladiator-pipeline

pub mod job_config;
pub mod progress;

pub use job_config::{file_stem, InputFiles, JobConfig, JobOption, CONFIG_FILE};
pub use progress::{
    PhaseError, PhaseProgress, PhaseStatus, ProgressSink, ProgressSnapshot, ProgressTree,
};
