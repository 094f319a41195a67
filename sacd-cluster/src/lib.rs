#![warn(missing_docs)]
//! Coordinator roles of the distributed training cluster.
//!
//! Three roles cooperate over the [`sacd_rpc`] protocol:
//! - the [`evolver`] brokers actors onto learners and tracks liveness,
//! - the [`learner`] owns the model and the prioritized replay buffer and
//!   runs the training loop,
//! - [`actor`]s step environments and ship finished episodes.
//!
//! [`episode_queue`] decouples environment stepping from network I/O
//! inside an actor process; [`model_lock`] guards the model shared between
//! inference and variable updates.
pub mod actor;
pub mod episode_queue;
pub mod evolver;
pub mod learner;
pub mod model_lock;

pub use actor::{Actor, ActorConfig};
pub use episode_queue::{EpisodeQueue, QueueFull};
pub use evolver::{Evolver, EvolverConfig};
pub use learner::{Learner, LearnerConfig};
pub use model_lock::DiagRwLock;
