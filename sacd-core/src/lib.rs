#![warn(missing_docs)]
//! Core data model for distributed soft actor-critic training.
//!
//! This crate holds everything that is shared between the learner, the
//! actors and the evolver:
//! - [`NdArray`]: the flat numeric array that crosses process boundaries,
//! - [`Episode`]/[`Window`]: environment traces and the fixed-width
//!   training windows cut out of them,
//! - [`replay_buffer`]: the prioritized, n-step, recurrent-aware replay
//!   buffer backed by a sum tree,
//! - [`Model`]/[`Env`]: the capability traits behind which the neural
//!   network and the simulation environment are hidden.
pub mod env;
pub mod episode;
pub mod error;
pub mod model;
pub mod ndarray;
pub mod replay_buffer;

pub use env::{Env, EnvStep, EnvWorker};
pub use episode::{Episode, EpisodeBuilder, Window};
pub use error::CoreError;
pub use model::{Model, ModelRegistry, TrainOutput};
pub use ndarray::{Dtype, NdArray};
