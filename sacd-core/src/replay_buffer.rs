//! Prioritized, n-step, recurrent-aware experience replay.
//!
//! This module provides the replay machinery of the learner:
//! - [`SumTree`]: an array-backed binary tree mapping priority mass to a
//!   leaf index in O(log capacity),
//! - [`TransitionStore`]: column-wise storage of training windows so that
//!   single-field updates touch only one column,
//! - [`PrioritizedReplayBuffer`]: ring storage with stratified
//!   priority-weighted sampling and importance-sampling correction,
//! - [`EpisodeWindower`]: converts episode traces into fixed-width
//!   (burn-in + n-step) training windows.
mod base;
mod config;
mod store;
mod sum_tree;
mod windower;

pub use base::{PrioritizedReplayBuffer, SampledBatch};
pub use config::ReplayBufferConfig;
pub use store::{TransitionField, TransitionStore};
pub use sum_tree::SumTree;
pub use windower::EpisodeWindower;
