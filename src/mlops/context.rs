// src/mlops/context.rs

use crate::models::JsonMap;

/// The state threaded through a pipeline run.
///
/// Steps never mutate it: each returns a [`StepOutput`] and the runner
/// derives the next context with [`FlowContext::advance`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlowContext {
    /// Input handed to the next step by the previous one.
    direct_input: JsonMap,
    /// Every non-empty input and output seen so far, oldest first.
    history: Vec<JsonMap>,
    /// Output of the last step.
    output: JsonMap,
    metadata: JsonMap,
}

/// What a step hands back to the runner.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutput {
    pub output: JsonMap,
    /// Becomes the next step's direct input.
    pub next_input: JsonMap,
}

impl StepOutput {
    pub fn output(output: JsonMap) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn pass(next_input: JsonMap) -> Self {
        Self {
            next_input,
            ..Self::default()
        }
    }
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: JsonMap) -> Self {
        self.direct_input = input;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn direct_input(&self) -> &JsonMap {
        &self.direct_input
    }

    pub fn history(&self) -> &[JsonMap] {
        &self.history
    }

    pub fn output(&self) -> &JsonMap {
        &self.output
    }

    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    /// Moves the pending direct input into the history. Called by the runner
    /// before each step, so the step sees its own input in `history`.
    pub(crate) fn record_input(mut self) -> Self {
        let input = std::mem::take(&mut self.direct_input);
        if !input.is_empty() {
            self.history.push(input.clone());
        }
        self.direct_input = input;
        self
    }

    /// Applies a step's result: its output is recorded and becomes the
    /// current output, its `next_input` the next direct input.
    pub(crate) fn advance(mut self, step: StepOutput) -> Self {
        if !step.output.is_empty() {
            self.history.push(step.output.clone());
        }
        self.output = step.output;
        self.direct_input = step.next_input;
        self
    }

    /// Every value stored under `field` across the history, oldest first.
    pub fn values<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a serde_json::Value> + 'a {
        self.history.iter().filter_map(move |entry| entry.get(field))
    }
}
