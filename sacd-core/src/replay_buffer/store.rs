//! Column-wise storage of training windows.
use crate::episode::Window;
use crate::error::CoreError;
use crate::ndarray::NdArray;

/// Names one column of a [`TransitionStore`].
///
/// Observation fields carry the branch index, so every field maps to
/// exactly one column and an in-place update touches nothing else.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitionField {
    /// Windowed observations of one branch.
    Obs(usize),
    /// Windowed actions.
    Action,
    /// Windowed rewards.
    Reward,
    /// Next observation of one branch.
    NextObs(usize),
    /// Done flag.
    Done,
    /// Behavior-policy probabilities.
    MuProbs,
    /// Recurrent hidden state at the window start.
    RnnState,
}

/// Fixed-capacity, column-wise window storage.
///
/// The store is the single writer for both inserts and field updates; it
/// holds one `Vec` per field so that refreshing stale behavior
/// probabilities or hidden states rewrites a single column.
pub struct TransitionStore {
    capacity: usize,
    n_branches: usize,
    obses: Vec<Vec<NdArray>>,
    actions: Vec<NdArray>,
    rewards: Vec<NdArray>,
    next_obs: Vec<Vec<NdArray>>,
    dones: Vec<NdArray>,
    mu_probs: Vec<NdArray>,
    rnn_states: Vec<NdArray>,
}

impl TransitionStore {
    /// Creates a store for `capacity` windows of `n_branches` observation
    /// branches. All slots start empty.
    pub fn new(capacity: usize, n_branches: usize) -> Self {
        Self {
            capacity,
            n_branches,
            obses: vec![vec![NdArray::empty(); capacity]; n_branches],
            actions: vec![NdArray::empty(); capacity],
            rewards: vec![NdArray::empty(); capacity],
            next_obs: vec![vec![NdArray::empty(); capacity]; n_branches],
            dones: vec![NdArray::empty(); capacity],
            mu_probs: vec![NdArray::empty(); capacity],
            rnn_states: vec![NdArray::empty(); capacity],
        }
    }

    /// Number of observation branches per window.
    pub fn n_branches(&self) -> usize {
        self.n_branches
    }

    /// Overwrites the slot at `ix`.
    pub fn set(&mut self, ix: usize, w: Window) -> Result<(), CoreError> {
        debug_assert!(ix < self.capacity);
        if w.obses.len() != self.n_branches {
            return Err(CoreError::ShapeMismatch(format!(
                "window has {} observation branches, store expects {}",
                w.obses.len(),
                self.n_branches
            )));
        }
        for (b, o) in w.obses.into_iter().enumerate() {
            self.obses[b][ix] = o;
        }
        for (b, o) in w.next_obs.into_iter().enumerate() {
            self.next_obs[b][ix] = o;
        }
        self.actions[ix] = w.actions;
        self.rewards[ix] = w.rewards;
        self.dones[ix] = w.done;
        self.mu_probs[ix] = w.mu_probs;
        self.rnn_states[ix] = w.rnn_state;
        Ok(())
    }

    /// Clones the window at `ix`.
    pub fn get(&self, ix: usize) -> Window {
        debug_assert!(ix < self.capacity);
        Window {
            obses: (0..self.n_branches)
                .map(|b| self.obses[b][ix].clone())
                .collect(),
            actions: self.actions[ix].clone(),
            rewards: self.rewards[ix].clone(),
            next_obs: (0..self.n_branches)
                .map(|b| self.next_obs[b][ix].clone())
                .collect(),
            done: self.dones[ix].clone(),
            mu_probs: self.mu_probs[ix].clone(),
            rnn_state: self.rnn_states[ix].clone(),
        }
    }

    /// Overwrites one column at the given slots.
    pub fn update_field(
        &mut self,
        field: TransitionField,
        ixs: &[usize],
        values: &[NdArray],
    ) -> Result<(), CoreError> {
        if ixs.len() != values.len() {
            return Err(CoreError::ShapeMismatch(format!(
                "{} indices but {} values",
                ixs.len(),
                values.len()
            )));
        }
        let column = match field {
            TransitionField::Obs(b) => self
                .obses
                .get_mut(b)
                .ok_or_else(|| CoreError::ShapeMismatch(format!("no observation branch {}", b)))?,
            TransitionField::NextObs(b) => self
                .next_obs
                .get_mut(b)
                .ok_or_else(|| CoreError::ShapeMismatch(format!("no observation branch {}", b)))?,
            TransitionField::Action => &mut self.actions,
            TransitionField::Reward => &mut self.rewards,
            TransitionField::Done => &mut self.dones,
            TransitionField::MuProbs => &mut self.mu_probs,
            TransitionField::RnnState => &mut self.rnn_states,
        };
        for (&ix, v) in ixs.iter().zip(values.iter()) {
            column[ix] = v.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(v: f32) -> Window {
        Window {
            obses: vec![NdArray::from_f32(&[2, 1], &[v, v])],
            actions: NdArray::from_f32(&[2, 1], &[v, v]),
            rewards: NdArray::from_f32(&[2], &[v, v]),
            next_obs: vec![NdArray::from_f32(&[1, 1], &[v])],
            done: NdArray::from_f32(&[1], &[0.]),
            mu_probs: NdArray::from_f32(&[2, 1], &[0.5, 0.5]),
            rnn_state: NdArray::empty(),
        }
    }

    #[test]
    fn test_set_get() {
        let mut store = TransitionStore::new(4, 1);
        store.set(1, window(7.)).unwrap();
        let w = store.get(1);
        assert_eq!(w.rewards.to_f32().unwrap(), vec![7., 7.]);
        assert!(store.get(0).actions.is_empty());
    }

    #[test]
    fn test_update_single_column() {
        let mut store = TransitionStore::new(4, 1);
        store.set(0, window(1.)).unwrap();
        store.set(1, window(2.)).unwrap();
        let fresh = NdArray::from_f32(&[2, 1], &[0.9, 0.1]);
        store
            .update_field(TransitionField::MuProbs, &[1], &[fresh.clone()])
            .unwrap();
        assert_eq!(store.get(1).mu_probs, fresh);
        // untouched column and untouched slot keep their values
        assert_eq!(store.get(1).rewards.to_f32().unwrap(), vec![2., 2.]);
        assert_eq!(store.get(0).mu_probs.to_f32().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_update_field_validation() {
        let mut store = TransitionStore::new(4, 1);
        assert!(store
            .update_field(TransitionField::Obs(3), &[0], &[NdArray::empty()])
            .is_err());
        assert!(store
            .update_field(TransitionField::MuProbs, &[0, 1], &[NdArray::empty()])
            .is_err());
    }
}
