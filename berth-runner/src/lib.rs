//! Berth Runner
//!
//! Executes the deployment surface of a stack locally:
//! - `engine`: container engine driver (docker or podman compose)
//! - `readiness`: probes that wait until a service accepts connections
//! - `bootstrap`: applies a SQL script to a database service
//! - `target`: runs entry point targets action by action
//! - `pipeline`: runs a CI job against a local checkout and reports its status

pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod readiness;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::{EngineKind, RunnerConfig};
pub use engine::{ComposeEngine, ContainerEngine, ExecOutput};
pub use error::{Result, RunnerError};
pub use pipeline::{PipelineContext, PipelineRunner, StatusReporter};
pub use readiness::{Probe, ReadinessPolicy, wait_ready};
pub use target::{RunSummary, TargetRunner};
