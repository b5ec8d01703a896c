// src/mlops/mod.rs

//! ML pipelines and operations: named step lists from configuration, run
//! against an explicit step registry.

pub mod context;
pub mod pipeline;
pub mod registry;

use crate::core::config_resolver::ConfigError;
use thiserror::Error;

pub use context::{FlowContext, StepOutput};
pub use pipeline::{Pipeline, PipelineKind, load_pipelines};
pub use registry::{StepFn, StepRegistry};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline '{pipeline}' uses step '{step}', which is not registered.")]
    UnknownStep { pipeline: String, step: String },
    #[error("No pipeline '{key}' in section '[{section}]'.")]
    UnknownPipeline { section: String, key: String },
    #[error("Step '{step}' of pipeline '{pipeline}' failed: {source:#}")]
    StepFailed {
        pipeline: String,
        step: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
