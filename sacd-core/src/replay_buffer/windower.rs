//! Episode-to-window conversion.
use crate::episode::{Episode, Window};

/// Cuts fixed-width training windows out of episode traces.
///
/// A trace of padded length `L` (steps plus the trailing next-observation)
/// yields `L - (burn_in + n_step)` overlapping windows, each spanning
/// `burn_in + n_step` steps plus the observation of the step after. The
/// leading `burn_in` steps only warm up a recurrent encoder; the trailing
/// `n_step` steps provide the n-step return.
#[derive(Clone, Copy, Debug)]
pub struct EpisodeWindower {
    burn_in: usize,
    n_step: usize,
}

impl EpisodeWindower {
    /// Creates a windower.
    pub fn new(burn_in: usize, n_step: usize) -> Self {
        debug_assert!(n_step > 0);
        Self { burn_in, n_step }
    }

    /// Steps covered by one window.
    pub fn window_len(&self) -> usize {
        self.burn_in + self.n_step
    }

    /// Converts a trace into windows.
    ///
    /// Traces too short to form a single window yield an empty vector;
    /// callers drop them silently.
    pub fn windows(&self, episode: &Episode) -> Vec<Window> {
        let w = self.window_len();
        if !episode.is_trainable(self.burn_in, self.n_step) {
            return vec![];
        }
        let n_windows = episode.padded_len() - w;

        (0..n_windows)
            .map(|i| Window {
                obses: episode
                    .obses
                    .iter()
                    .map(|o| o.slice_rows(i, i + w))
                    .collect(),
                actions: episode.actions.slice_rows(i, i + w),
                rewards: episode.rewards.slice_rows(i, i + w),
                next_obs: episode
                    .obses
                    .iter()
                    .map(|o| o.slice_rows(i + w, i + w + 1))
                    .collect(),
                done: episode.dones.slice_rows(i + w - 1, i + w),
                mu_probs: if episode.mu_probs.is_empty() {
                    episode.mu_probs.clone()
                } else {
                    episode.mu_probs.slice_rows(i, i + w)
                },
                rnn_state: if episode.rnn_states.is_empty() {
                    episode.rnn_states.clone()
                } else {
                    episode.rnn_states.slice_rows(i, i + 1)
                },
            })
            .collect()
    }
}
