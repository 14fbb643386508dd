//! # glaDIAtor Common Library
//!
//! Shared code for the glaDIAtor pipeline service and command-line runner:
//! - Error types
//! - Service configuration loading and result root resolution
//! - Completion notifications and the pipeline event bus
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
