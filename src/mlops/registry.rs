// src/mlops/registry.rs

use crate::mlops::context::{FlowContext, StepOutput};
use std::collections::HashMap;

/// A pipeline step. User code reports failures through `anyhow`.
pub type StepFn = fn(&FlowContext) -> anyhow::Result<StepOutput>;

/// Maps the step names used in `steps = [..]` lists to compiled functions.
/// Populated by the host at startup.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepFn>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` under `name` (case-insensitive), replacing any
    /// previous registration.
    pub fn register(&mut self, name: &str, step: StepFn) -> &mut Self {
        let name = name.trim().to_lowercase();
        if self.steps.insert(name.clone(), step).is_some() {
            log::warn!("Step '{}' registered twice; the later one wins.", name);
        }
        self
    }

    pub fn with(mut self, name: &str, step: StepFn) -> Self {
        self.register(name, step);
        self
    }

    pub fn get(&self, name: &str) -> Option<StepFn> {
        self.steps.get(&name.trim().to_lowercase()).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &FlowContext) -> anyhow::Result<StepOutput> {
        Ok(StepOutput::default())
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = StepRegistry::new().with("Train", noop).with("score", noop);
        assert!(registry.contains(" train "));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["score", "train"]);
    }
}
