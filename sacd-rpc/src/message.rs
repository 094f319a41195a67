//! Message set of the evolver and learner services.
//!
//! One request enum and one response enum per service; a unary call sends
//! one request frame and reads one response frame. Heartbeats reuse the
//! same framing: a `Ping` request answered by a `Pong`, repeated on a
//! dedicated connection.
//!
//! Configuration blobs travel as JSON strings so that the wire format does
//! not have to change when a role grows a new config field.
use sacd_core::{Episode, NdArray};
use serde::{Deserialize, Serialize};

/// Heartbeat payload.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Ping {
    /// Sender's clock, milliseconds since the Unix epoch.
    pub time_ms: u64,

    /// Set when the pinging process is a registered learner, so the
    /// evolver can drop the registration when the heartbeat dies.
    pub learner_id: Option<u64>,
}

/// Address of a learner, as handed to actors by the evolver.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LearnerAddr {
    /// Host name or IP.
    pub host: String,

    /// TCP port of the learner service.
    pub port: u16,
}

/// Everything an actor needs to build its local copies of the model and
/// environment, handed back by the learner on registration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ActorRegistration {
    /// Directory the learner writes model snapshots to.
    pub model_dir: String,

    /// Actor id unique within the learner.
    pub actor_id: u64,

    /// Environment reset configuration, JSON.
    pub reset_config_json: String,

    /// Model configuration, JSON.
    pub model_config_json: String,

    /// Training hyperparameters, JSON.
    pub sac_config_json: String,
}

/// Requests handled by the evolver.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum EvolverRequest {
    /// Heartbeat.
    Ping(Ping),

    /// An actor asks which learner to attach to.
    RegisterActor,

    /// A learner announces its service endpoint.
    RegisterLearner {
        /// Host the learner serves on.
        host: String,
        /// Port the learner serves on.
        port: u16,
    },
}

/// Responses of the evolver.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum EvolverResponse {
    /// Heartbeat answer.
    Pong,

    /// Assigned learner, or `None` while no learner is alive (the actor
    /// retries).
    ActorRegistration(Option<LearnerAddr>),

    /// Registration outcome of a learner.
    LearnerRegistration {
        /// Display name assigned by the evolver.
        name: String,
        /// Learner id, echoed in subsequent heartbeats.
        id: u64,
    },
}

/// Requests handled by the learner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum LearnerRequest {
    /// Heartbeat.
    Ping(Ping),

    /// An actor attaches to this learner.
    RegisterActor,

    /// Fire-and-forget experience submission.
    Add(Episode),

    /// Synchronous inference for actors without a local policy copy.
    GetAction {
        /// Observation branches, each `[1, ...]`.
        obses: Vec<NdArray>,
        /// Recurrent state, empty for feed-forward policies.
        rnn_state: NdArray,
    },

    /// Pull of the current policy variables.
    GetPolicyVariables,
}

/// Responses of the learner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum LearnerResponse {
    /// Heartbeat answer.
    Pong,

    /// Registration payload, or `None` while the learner is not ready to
    /// take actors (the actor retries).
    ActorRegistration(Option<ActorRegistration>),

    /// Acknowledgement of an [`LearnerRequest::Add`].
    AddAck,

    /// Inference result.
    Action {
        /// Chosen action, `[1, action_dim]`.
        action: NdArray,
        /// Next recurrent state, empty for feed-forward policies.
        rnn_state: NdArray,
    },

    /// Variable snapshot, or `None` while the model is not ready.
    PolicyVariables(Option<Vec<NdArray>>),
}
