//! Prioritized replay buffer.
use super::{store::TransitionStore, sum_tree::SumTree, ReplayBufferConfig, TransitionField};
use crate::episode::Window;
use crate::error::CoreError;
use crate::ndarray::NdArray;
use rand::{rngs::StdRng, RngCore, SeedableRng};

/// One stratified sample drawn from the buffer.
pub struct SampledBatch {
    /// Sum-tree leaf indices of the sampled windows; hand these back to
    /// [`PrioritizedReplayBuffer::update`] and
    /// [`PrioritizedReplayBuffer::update_transitions`].
    pub points: Vec<usize>,

    /// The sampled windows.
    pub windows: Vec<Window>,

    /// Importance-sampling correction weights, one per window.
    pub weights: Vec<f32>,
}

/// Fixed-capacity replay buffer with priority-weighted sampling.
///
/// Capacity is rounded down to the nearest power of two. The buffer is the
/// single writer for inserts and updates and is not thread safe: the
/// training loop must serialize `sample`/`update`/`add`.
pub struct PrioritizedReplayBuffer {
    batch_size: usize,
    capacity: usize,
    alpha: f32,
    epsilon: f32,
    beta: f32,
    beta_increment: f32,
    td_err_upper: f32,
    tree: SumTree,
    store: Option<TransitionStore>,
    rng: StdRng,
}

impl PrioritizedReplayBuffer {
    /// Creates a buffer from a configuration.
    pub fn build(config: &ReplayBufferConfig) -> Self {
        let capacity = prev_power_of_two(config.capacity);
        Self {
            batch_size: config.batch_size,
            capacity,
            alpha: config.alpha,
            epsilon: config.epsilon,
            beta: config.beta,
            beta_increment: config.beta_increment_per_sampling,
            td_err_upper: config.td_err_upper,
            tree: SumTree::new(capacity),
            store: None,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn priority_of(&self, td_error: f32) -> f32 {
        (td_error.abs() + self.epsilon)
            .min(self.td_err_upper)
            .powf(self.alpha)
    }

    fn store_mut(&mut self, n_branches: usize) -> &mut TransitionStore {
        let capacity = self.capacity;
        self.store
            .get_or_insert_with(|| TransitionStore::new(capacity, n_branches))
    }

    /// Inserts windows at the current maximum priority.
    ///
    /// An empty buffer has no maximum yet; the TD error ceiling seeds it,
    /// so fresh experience is sampled at least once before its priority is
    /// corrected.
    pub fn add(&mut self, windows: Vec<Window>) -> Result<(), CoreError> {
        let mut max_p = self.tree.max();
        if max_p == 0f32 {
            max_p = self.td_err_upper;
        }
        for w in windows {
            let data_ix = self.tree.add(max_p);
            self.store_mut(w.obses.len()).set(data_ix, w)?;
        }
        Ok(())
    }

    /// Inserts windows with priorities derived from their TD errors.
    pub fn add_with_td_errors(
        &mut self,
        td_errors: &[f32],
        windows: Vec<Window>,
    ) -> Result<(), CoreError> {
        if td_errors.len() != windows.len() {
            return Err(CoreError::ShapeMismatch(format!(
                "{} td errors for {} windows",
                td_errors.len(),
                windows.len()
            )));
        }
        for (w, &td) in windows.into_iter().zip(td_errors.iter()) {
            let p = self.priority_of(td);
            let data_ix = self.tree.add(p);
            self.store_mut(w.obses.len()).set(data_ix, w)?;
        }
        Ok(())
    }

    /// Draws a stratified, priority-weighted batch.
    ///
    /// Returns `None` while the buffer holds no more than one batch of
    /// windows; the caller skips the training step in that case. Each call
    /// anneals the importance-sampling exponent toward 1.0.
    pub fn sample(&mut self) -> Option<SampledBatch> {
        if !self.is_lg_batch_size() {
            return None;
        }
        self.beta = 1f32.min(self.beta + self.beta_increment);

        let total = self.tree.total();
        let segment = total / self.batch_size as f32;
        let mut min_prob = self.tree.min() / total;
        if min_prob == 0f32 {
            min_prob = self.epsilon;
        }

        let mut points = Vec::with_capacity(self.batch_size);
        let mut windows = Vec::with_capacity(self.batch_size);
        let mut weights = Vec::with_capacity(self.batch_size);
        let store = self.store.as_ref()?;
        for i in 0..self.batch_size {
            let u = (self.rng.next_u32() as f32) / (u32::MAX as f32);
            let v = segment * (i as f32 + u);
            let (leaf_ix, p, data_ix) = self.tree.get(v);
            let prob = p / total;
            points.push(leaf_ix);
            weights.push((prob / min_prob).powf(-self.beta));
            windows.push(store.get(data_ix));
        }

        Some(SampledBatch {
            points,
            windows,
            weights,
        })
    }

    /// Rewrites priorities at the sampled points from fresh TD errors.
    pub fn update(&mut self, points: &[usize], td_errors: &[f32]) {
        for (&leaf_ix, &td) in points.iter().zip(td_errors.iter()) {
            let p = self.priority_of(td);
            self.tree.update(leaf_ix, p);
        }
    }

    /// Overwrites one transition column at the sampled points, leaving
    /// priorities untouched.
    ///
    /// Used to refresh stale behavior probabilities or recurrent hidden
    /// states after a training step.
    pub fn update_transitions(
        &mut self,
        field: TransitionField,
        points: &[usize],
        values: &[NdArray],
    ) -> Result<(), CoreError> {
        let ixs: Vec<usize> = points.iter().map(|&p| self.tree.data_of(p)).collect();
        match self.store.as_mut() {
            Some(store) => store.update_field(field, &ixs, values),
            None => Err(CoreError::ShapeMismatch("buffer is empty".into())),
        }
    }

    /// Zeroes all priorities and resets the write pointer. Capacity is
    /// unchanged.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// Number of stored windows.
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// `true` once the ring has wrapped.
    pub fn is_full(&self) -> bool {
        self.tree.is_full()
    }

    /// `true` once the buffer holds more than one batch.
    pub fn is_lg_batch_size(&self) -> bool {
        self.size() > self.batch_size
    }

    /// Total priority mass currently in the tree.
    pub fn total_priority(&self) -> f32 {
        self.tree.total()
    }
}

fn prev_power_of_two(n: usize) -> usize {
    debug_assert!(n > 0);
    if n.is_power_of_two() {
        n
    } else {
        n.next_power_of_two() >> 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(batch_size: usize, capacity: usize) -> ReplayBufferConfig {
        ReplayBufferConfig::default()
            .batch_size(batch_size)
            .capacity(capacity)
    }

    fn window(reward: f32) -> Window {
        Window {
            obses: vec![NdArray::from_f32(&[3, 2], &[reward; 6])],
            actions: NdArray::from_f32(&[3, 1], &[0.; 3]),
            rewards: NdArray::from_f32(&[3], &[reward; 3]),
            next_obs: vec![NdArray::from_f32(&[1, 2], &[0.; 2])],
            done: NdArray::from_f32(&[1], &[0.]),
            mu_probs: NdArray::from_f32(&[3, 1], &[0.5; 3]),
            rnn_state: NdArray::empty(),
        }
    }

    fn windows(rewards: &[f32]) -> Vec<Window> {
        rewards.iter().map(|&r| window(r)).collect()
    }

    #[test]
    fn test_capacity_rounds_down() {
        let buffer = PrioritizedReplayBuffer::build(&config(2, 100));
        let mut buffer = buffer;
        buffer.add(windows(&[0.; 70])).unwrap();
        // 100 rounds down to 64; inserting 70 wraps the ring
        assert!(buffer.is_full());
        assert_eq!(buffer.size(), 64);
    }

    #[test]
    fn test_sample_requires_fill() {
        let mut buffer = PrioritizedReplayBuffer::build(&config(4, 16));
        buffer.add(windows(&[1., 2., 3., 4.])).unwrap();
        assert!(buffer.sample().is_none());
        buffer.add(windows(&[5.])).unwrap();
        let batch = buffer.sample().unwrap();
        assert_eq!(batch.points.len(), 4);
        assert_eq!(batch.windows.len(), 4);
        assert_eq!(batch.weights.len(), 4);
    }

    #[test]
    fn test_priority_monotonic_and_clipped() {
        // below the ceiling, larger |td| means larger priority
        let mut small = PrioritizedReplayBuffer::build(&config(1, 8));
        small.add_with_td_errors(&[0.2], windows(&[0.])).unwrap();
        let mut large = PrioritizedReplayBuffer::build(&config(1, 8));
        large.add_with_td_errors(&[0.5], windows(&[0.])).unwrap();
        assert!(large.total_priority() > small.total_priority());

        // beyond the ceiling, clipping makes priorities equal
        let mut clipped_a = PrioritizedReplayBuffer::build(&config(1, 8));
        clipped_a.add_with_td_errors(&[2.0], windows(&[0.])).unwrap();
        let mut clipped_b = PrioritizedReplayBuffer::build(&config(1, 8));
        clipped_b.add_with_td_errors(&[5.0], windows(&[0.])).unwrap();
        assert!((clipped_a.total_priority() - clipped_b.total_priority()).abs() < 1e-6);
    }

    #[test]
    fn test_ring_keeps_most_recent() {
        let mut buffer = PrioritizedReplayBuffer::build(&config(2, 4));
        buffer.add(windows(&[0., 1., 2., 3., 4., 5.])).unwrap();
        for _ in 0..20 {
            let batch = buffer.sample().unwrap();
            for w in batch.windows {
                let r = w.rewards.to_f32().unwrap()[0];
                assert!(r >= 2.0, "overwritten window {} still sampleable", r);
            }
        }
    }

    #[test]
    fn test_importance_weights() {
        let mut buffer = PrioritizedReplayBuffer::build(&config(2, 8));
        buffer
            .add_with_td_errors(&[0.9, 0.1, 0.9], windows(&[1., 2., 3.]))
            .unwrap();
        let mut seen_low = None;
        let mut seen_high = None;
        for _ in 0..100 {
            let batch = buffer.sample().unwrap();
            for (w, &weight) in batch.windows.iter().zip(batch.weights.iter()) {
                assert!(weight > 0.0 && weight <= 1.0 + 1e-5);
                let r = w.rewards.to_f32().unwrap()[0];
                if r == 2.0 {
                    seen_low = Some(weight);
                } else {
                    seen_high = Some(weight);
                }
            }
            if seen_low.is_some() && seen_high.is_some() {
                break;
            }
        }
        // the rarely-sampled window carries the larger correction
        assert!(seen_low.unwrap() > seen_high.unwrap());
    }

    #[test]
    fn test_update_moves_priority() {
        let mut buffer = PrioritizedReplayBuffer::build(&config(2, 8));
        buffer
            .add_with_td_errors(&[0.5, 0.5, 0.5], windows(&[1., 2., 3.]))
            .unwrap();
        let batch = buffer.sample().unwrap();
        let before = buffer.total_priority();
        buffer.update(&batch.points, &[0.0, 0.0]);
        assert!(buffer.total_priority() < before);
    }

    #[test]
    fn test_update_transitions_refreshes_column() {
        let mut buffer = PrioritizedReplayBuffer::build(&config(2, 8));
        buffer.add(windows(&[1., 2., 3.])).unwrap();
        let batch = buffer.sample().unwrap();
        let fresh: Vec<NdArray> = batch
            .points
            .iter()
            .map(|_| NdArray::from_f32(&[3, 1], &[0.9; 3]))
            .collect();
        buffer
            .update_transitions(TransitionField::MuProbs, &batch.points, &fresh)
            .unwrap();
        let again = buffer.sample().unwrap();
        for w in again.windows {
            let probs = w.mu_probs.to_f32().unwrap();
            assert!(probs == vec![0.9; 3] || probs == vec![0.5; 3]);
        }
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = PrioritizedReplayBuffer::build(&config(2, 8));
        buffer.add(windows(&[1., 2., 3.])).unwrap();
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.total_priority(), 0.0);
        assert!(buffer.sample().is_none());
    }
}
