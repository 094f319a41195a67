//! Capability interface of the trainable model.
//!
//! The neural network itself is out of scope for this workspace; the
//! coordination layer only needs the small capability set below. Concrete
//! networks are selected through a name-keyed [`ModelRegistry`] driven by
//! configuration, never by loading code at runtime.
use crate::error::CoreError;
use crate::ndarray::NdArray;
use crate::replay_buffer::SampledBatch;
use anyhow::Result;
use std::collections::HashMap;

/// Outcome of one optimization step.
pub struct TrainOutput {
    /// Global optimization step after the update.
    pub step: usize,

    /// Fresh TD error per window of the batch, used to rewrite
    /// priorities.
    pub td_errors: Vec<f32>,
}

/// The black-box policy/value model.
///
/// Implementations own their parameters; the coordination layer moves them
/// around as flat [`NdArray`] variable lists and never looks inside. The
/// learner shares one model between its connection threads and the
/// training thread, so implementations must be `Sync`; all `&self` methods
/// are read-only and mutation goes through `&mut self`.
pub trait Model: Send + Sync {
    /// Chooses an action for the given observation branches.
    ///
    /// `rnn_state` is empty for feed-forward policies; the returned next
    /// state is empty in that case too.
    fn predict(&self, obses: &[NdArray], rnn_state: &NdArray) -> (NdArray, NdArray);

    /// Runs one optimization step on a sampled batch.
    fn train_step(&mut self, batch: &SampledBatch) -> TrainOutput;

    /// Snapshots the policy variables for broadcast.
    fn get_variables(&self) -> Vec<NdArray>;

    /// Replaces the policy variables with a received broadcast.
    fn set_variables(&mut self, variables: &[NdArray]) -> Result<(), CoreError>;

    /// Probability of each taken action under the current policy, over one
    /// `[steps, ...]` trace.
    fn behavior_probs(&self, obses: &[NdArray], actions: &NdArray, rnn_state: &NdArray)
        -> NdArray;

    /// Initial recurrent hidden state, or empty for feed-forward policies.
    fn initial_rnn_state(&self) -> NdArray;
}

type ModelBuilder = Box<dyn Fn(&str) -> Result<Box<dyn Model>> + Send + Sync>;

/// Name-keyed factory for [`Model`] implementations.
///
/// Roles receive the model name and a JSON configuration blob during
/// registration and build their local copy here.
#[derive(Default)]
pub struct ModelRegistry {
    builders: HashMap<String, ModelBuilder>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registers a builder under `name`.
    ///
    /// The builder receives the model configuration as a JSON string.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(&str) -> Result<Box<dyn Model>> + Send + Sync + 'static,
    {
        self.builders.insert(name.into(), Box::new(builder));
    }

    /// Builds the model registered under `name`.
    pub fn build(&self, name: &str, model_config_json: &str) -> Result<Box<dyn Model>> {
        match self.builders.get(name) {
            Some(builder) => builder(model_config_json),
            None => Err(CoreError::UnknownModel(name.to_string()).into()),
        }
    }
}
