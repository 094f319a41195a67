//! Configuration of the prioritized replay buffer.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`PrioritizedReplayBuffer`](super::PrioritizedReplayBuffer).
///
/// The defaults reproduce the classic prioritized-replay setting: a mild
/// priority exponent, a small floor keeping zero-error transitions
/// sampleable, and an importance-sampling exponent annealed toward 1.0.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReplayBufferConfig {
    /// Number of windows returned by one `sample()` call.
    pub batch_size: usize,

    /// Requested capacity; rounded down to the nearest power of two so
    /// that sum-tree leaves stay contiguous.
    pub capacity: usize,

    /// Priority exponent converting TD error magnitude to priority.
    pub alpha: f32,

    /// Small additive floor avoiding zero-priority starvation.
    pub epsilon: f32,

    /// Initial importance-sampling exponent.
    pub beta: f32,

    /// Per-sample-call increment of `beta`, clamped at 1.0.
    pub beta_increment_per_sampling: f32,

    /// TD errors are clipped here before exponentiation, bounding the
    /// influence of outliers.
    pub td_err_upper: f32,

    /// Seed of the sampling RNG.
    pub seed: u64,
}

impl Default for ReplayBufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            capacity: 524288,
            alpha: 0.9,
            epsilon: 0.01,
            beta: 0.4,
            beta_increment_per_sampling: 0.001,
            td_err_upper: 1.0,
            seed: 42,
        }
    }
}

impl ReplayBufferConfig {
    /// Sets the batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the priority exponent.
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_yaml_roundtrip() {
        let dir = TempDir::new("replay_config").unwrap();
        let path = dir.path().join("replay.yaml");
        let config = ReplayBufferConfig::default().batch_size(16).capacity(4096);
        config.save(&path).unwrap();
        assert_eq!(ReplayBufferConfig::load(&path).unwrap(), config);
    }
}
