#![warn(missing_docs)]
//! Wire protocol of the distributed training cluster.
//!
//! The cluster runs three kinds of processes (actors, one learner, one
//! evolver) that talk over plain TCP. Each request/response pair travels
//! as one length-prefixed bincode frame ([`frame`]); the message set is a
//! pair of request/response enums per service ([`message`]).
//!
//! The client side ([`client`], [`stub`]) handles the unreliable parts:
//! reconnecting connections, bounded retry with logging, indefinite
//! registration loops, and a heartbeat thread that owns the shared
//! `connected` flag. The server side ([`server`]) dispatches frames to a
//! [`Service`] implementation on one thread per connection and tracks
//! peers in a [`PeerSet`].
pub mod client;
pub mod error;
pub mod frame;
pub mod message;
pub mod peer;
pub mod server;
pub mod stub;

pub use client::{Connection, Heartbeat, Retry};
pub use error::RpcError;
pub use message::{
    ActorRegistration, EvolverRequest, EvolverResponse, LearnerAddr, LearnerRequest,
    LearnerResponse, Ping,
};
pub use peer::PeerSet;
pub use server::{serve, ServerHandle, Service};
pub use stub::{EvolverStub, LearnerStub};
