// src/mlops/pipeline.rs

use crate::constants::K_STEPS;
use crate::core::app_config::AppConfig;
use crate::core::config_resolver::{self, ResolvedConfig};
use crate::mlops::context::FlowContext;
use crate::mlops::registry::{StepFn, StepRegistry};
use crate::mlops::{PipelineError, PipelineResult};
use crate::models::{ConfigTree, ConfigTreeExt, ConfigType, QualifiedKey};

/// Which section a pipeline comes from. Both share the same runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// `[ml_pipelines]`: model development.
    Pipeline,
    /// `[ml_ops]`: operationalised flows.
    Ops,
}

impl PipelineKind {
    pub fn section(&self) -> ConfigType {
        match self {
            PipelineKind::Pipeline => ConfigType::MlPipelines,
            PipelineKind::Ops => ConfigType::MlOps,
        }
    }
}

/// A named sequence of registered steps.
#[derive(Debug, Clone)]
pub struct Pipeline {
    key: QualifiedKey,
    kind: PipelineKind,
    description: Option<String>,
    steps: Vec<(String, StepFn)>,
}

impl Pipeline {
    /// # Errors
    /// `UnknownStep` if a listed step is not registered.
    pub fn from_config(
        key: QualifiedKey,
        kind: PipelineKind,
        config: &ConfigTree,
        registry: &StepRegistry,
    ) -> PipelineResult<Self> {
        let steps = config
            .get_string_list(K_STEPS)
            .into_iter()
            .map(|name| match registry.get(&name) {
                Some(step) => Ok((name, step)),
                None => Err(PipelineError::UnknownStep {
                    pipeline: key.to_string(),
                    step: name,
                }),
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        if steps.is_empty() {
            log::warn!("Pipeline '{}' has no steps.", key);
        }
        Ok(Self {
            description: config.get_str("description").map(str::to_string),
            key,
            kind,
            steps,
        })
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Runs every step in order, threading the context through.
    ///
    /// # Errors
    /// `StepFailed` with the failing step's error; later steps do not run.
    pub fn run(&self, ctx: FlowContext) -> PipelineResult<FlowContext> {
        let mut ctx = ctx;
        for (name, step) in &self.steps {
            log::debug!("Pipeline '{}': running step '{}'.", self.key, name);
            ctx = ctx.record_input();
            let output = step(&ctx).map_err(|source| PipelineError::StepFailed {
                pipeline: self.key.to_string(),
                step: name.clone(),
                source,
            })?;
            ctx = ctx.advance(output);
        }
        log::info!("Pipeline '{}' finished {} step(s).", self.key, self.steps.len());
        Ok(ctx)
    }
}

/// Builds the pipelines an application lists under `ml_pipelines` or `ml_ops`.
///
/// # Errors
/// * `Config(MissingSection)` if the section is absent.
/// * `UnknownPipeline` for a reference matching no entry.
/// * `UnknownStep` for an unregistered step.
pub fn load_pipelines(
    app: &AppConfig,
    resolved: &ResolvedConfig,
    kind: PipelineKind,
    registry: &StepRegistry,
) -> PipelineResult<Vec<Pipeline>> {
    let section = kind.section();
    let references = match kind {
        PipelineKind::Pipeline => app.ml_pipelines(),
        PipelineKind::Ops => app.ml_ops(),
    };

    references
        .iter()
        .map(|reference| -> PipelineResult<Pipeline> {
            let lookup = config_resolver::get_group_item_config(reference, section.as_str(), &resolved.tree)?;
            let key = config_resolver::split_group_key(&lookup.key);
            if lookup.is_empty() || !key.is_complete() {
                return Err(PipelineError::UnknownPipeline {
                    section: section.to_string(),
                    key: reference.clone(),
                });
            }
            Pipeline::from_config(key, kind, &lookup.config, registry)
        })
        .collect()
}
