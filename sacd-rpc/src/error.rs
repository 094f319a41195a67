//! Errors in the RPC layer.
use thiserror::Error;

/// Errors in the RPC layer.
///
/// Transport and codec failures are the retryable ones; the retry
/// wrappers in [`client`](crate::client) treat everything else as final.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Socket-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A frame failed to encode or decode.
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// An incoming frame announced a payload beyond the size cap.
    #[error("Frame of {0} bytes exceeds the size cap")]
    Oversized(usize),

    /// The peer closed the connection.
    #[error("Peer disconnected")]
    Disconnected,

    /// The peer answered with a response of the wrong variant.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RpcError {
    /// True for failures that a reconnect-and-retry can fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Disconnected)
    }
}
