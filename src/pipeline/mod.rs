//! # Pipeline
//!
//! Process-level wiring around `aggregator_core`: configuration and the
//! start/stop/join hooks an external controller (the binary, or a test) uses.
//!
//! - `config` - flags, environment fallback, defaults and validation
//! - `runtime` - opens resources, spawns the stages, returns a handle

pub mod config;
pub mod runtime;

pub use config::{ConfigError, PipelineArgs, PipelineConfig};
pub use runtime::{Pipeline, PipelineError, PipelineHandle, PipelineStats};
