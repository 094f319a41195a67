//! Episode traces and training windows.
use crate::error::CoreError;
use crate::ndarray::NdArray;
use serde::{Deserialize, Serialize};

/// One agent's trace between a reset and a terminal/truncation event.
///
/// All fields are column arrays over the episode steps. Observation arrays
/// carry one trailing row: the observation following the last step, needed
/// as the bootstrap target of the final training window.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Episode {
    /// Observations, one array per observation branch, `[steps + 1, ...]`.
    pub obses: Vec<NdArray>,

    /// Actions, `[steps, action_dim]`.
    pub actions: NdArray,

    /// Rewards, `[steps]`.
    pub rewards: NdArray,

    /// Done flags (0/1), `[steps]`.
    pub dones: NdArray,

    /// Behavior-policy probabilities, `[steps, action_dim]`, or empty
    /// until the actor has filled them in.
    pub mu_probs: NdArray,

    /// Recurrent hidden states, `[steps, rnn_dim]`, or empty for
    /// feed-forward policies.
    pub rnn_states: NdArray,
}

impl Episode {
    /// Number of environment steps in the trace.
    pub fn steps(&self) -> usize {
        self.actions.rows()
    }

    /// Trace length including the trailing next-observation row.
    pub fn padded_len(&self) -> usize {
        self.steps() + 1
    }

    /// `true` if the trace is long enough to form at least one
    /// `(burn_in + n_step)`-wide training window.
    pub fn is_trainable(&self, burn_in: usize, n_step: usize) -> bool {
        self.steps() >= burn_in + n_step
    }

    /// A zero-filled episode at its maximal shape, used as a
    /// pre-allocated queue slot.
    pub fn zeroed(
        obs_shapes: &[Vec<usize>],
        action_dim: usize,
        rnn_dim: Option<usize>,
        max_steps: usize,
    ) -> Self {
        let obses = obs_shapes
            .iter()
            .map(|s| {
                let mut shape = vec![max_steps + 1];
                shape.extend_from_slice(s);
                NdArray::zeros_f32(&shape)
            })
            .collect();
        Self {
            obses,
            actions: NdArray::zeros_f32(&[max_steps, action_dim]),
            rewards: NdArray::zeros_f32(&[max_steps]),
            dones: NdArray::zeros_f32(&[max_steps]),
            mu_probs: NdArray::zeros_f32(&[max_steps, action_dim]),
            rnn_states: match rnn_dim {
                Some(d) => NdArray::zeros_f32(&[max_steps, d]),
                None => NdArray::empty(),
            },
        }
    }

    /// Copies the leading `steps` steps into a new episode.
    ///
    /// Consumers of pre-allocated slots use this to strip the unused tail
    /// before the trace leaves the process.
    pub fn slice_steps(&self, steps: usize) -> Self {
        Self {
            obses: self
                .obses
                .iter()
                .map(|o| o.slice_rows(0, steps + 1))
                .collect(),
            actions: self.actions.slice_rows(0, steps),
            rewards: self.rewards.slice_rows(0, steps),
            dones: self.dones.slice_rows(0, steps),
            mu_probs: if self.mu_probs.is_empty() {
                NdArray::empty()
            } else {
                self.mu_probs.slice_rows(0, steps)
            },
            rnn_states: if self.rnn_states.is_empty() {
                NdArray::empty()
            } else {
                self.rnn_states.slice_rows(0, steps)
            },
        }
    }
}

/// Accumulates per-step transitions and assembles an [`Episode`].
pub struct EpisodeBuilder {
    obs_rows: Vec<Vec<NdArray>>,
    action_rows: Vec<NdArray>,
    rewards: Vec<f32>,
    dones: Vec<f32>,
    rnn_rows: Vec<NdArray>,
}

impl EpisodeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            obs_rows: vec![],
            action_rows: vec![],
            rewards: vec![],
            dones: vec![],
            rnn_rows: vec![],
        }
    }

    /// Number of steps accumulated so far.
    pub fn len(&self) -> usize {
        self.action_rows.len()
    }

    /// `true` if no step has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.action_rows.is_empty()
    }

    /// Appends one environment step.
    ///
    /// `rnn_state` is the hidden state the policy held *before* taking the
    /// step; pass [`NdArray::empty`] for feed-forward policies.
    pub fn push_step(
        &mut self,
        obses: Vec<NdArray>,
        action: NdArray,
        reward: f32,
        done: bool,
        rnn_state: NdArray,
    ) {
        self.obs_rows.push(obses);
        self.action_rows.push(action);
        self.rewards.push(reward);
        self.dones.push(if done { 1. } else { 0. });
        self.rnn_rows.push(rnn_state);
    }

    /// Closes the trace with the observation following the last step.
    pub fn finish(self, next_obses: Vec<NdArray>) -> Result<Episode, CoreError> {
        let steps = self.action_rows.len();
        if steps == 0 {
            return Err(CoreError::ShapeMismatch("empty episode".into()));
        }
        let n_branches = next_obses.len();
        let mut obses = Vec::with_capacity(n_branches);
        for b in 0..n_branches {
            let mut rows: Vec<NdArray> =
                self.obs_rows.iter().map(|step| step[b].clone()).collect();
            rows.push(next_obses[b].clone());
            obses.push(NdArray::stack_rows(&rows)?);
        }
        let use_rnn = !self.rnn_rows[0].is_empty();
        Ok(Episode {
            obses,
            actions: NdArray::stack_rows(&self.action_rows)?,
            rewards: NdArray::from_f32(&[steps], &self.rewards),
            dones: NdArray::from_f32(&[steps], &self.dones),
            mu_probs: NdArray::empty(),
            rnn_states: if use_rnn {
                NdArray::stack_rows(&self.rnn_rows)?
            } else {
                NdArray::empty()
            },
        })
    }
}

impl Default for EpisodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One fixed-width training window cut out of an [`Episode`].
///
/// A window spans `burn_in + n_step` consecutive steps plus the
/// observation of the step after, and contributes exactly one replay
/// buffer entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    /// Observations over the window, one array per branch, `[w, ...]`.
    pub obses: Vec<NdArray>,

    /// Actions over the window, `[w, action_dim]`.
    pub actions: NdArray,

    /// Rewards over the window, `[w]`.
    pub rewards: NdArray,

    /// Observation following the window, one `[1, ...]` array per branch.
    pub next_obs: Vec<NdArray>,

    /// Done flag of the last step of the window, `[1]`.
    pub done: NdArray,

    /// Behavior-policy probabilities over the window, `[w, action_dim]`,
    /// or empty. Mutable post-hoc via the replay buffer.
    pub mu_probs: NdArray,

    /// Recurrent hidden state at the start of the window, `[rnn_dim]`, or
    /// empty. Mutable post-hoc via the replay buffer.
    pub rnn_state: NdArray,
}
