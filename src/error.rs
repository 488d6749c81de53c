use thiserror::Error;

use crate::peer::state::CallPhase;

/// Errors raised while setting up or running an audio call.
///
/// Every variant is recoverable: the pairing session survives all of them.
#[derive(Debug, Error)]
pub enum CallError {
    /// The media capability refused to hand out a microphone stream.
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// An offer/answer/description step was rejected.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Negotiation traffic with no matching call or link.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("{op} is not valid while the call is {phase:?}")]
    InvalidPhase { op: &'static str, phase: CallPhase },

    #[error("calls need an active chat partner")]
    NotChatting,

    #[error("peer link error: {0}")]
    Link(String),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

impl CallError {
    pub fn negotiation(err: impl std::fmt::Display) -> Self {
        CallError::Negotiation(err.to_string())
    }

    pub fn link(err: impl std::fmt::Display) -> Self {
        CallError::Link(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("failed to connect to signaling server: {0}")]
    Connect(String),

    #[error("signaling channel closed")]
    Closed,

    #[error("failed to encode signaling event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid ICE server {id}: {reason}")]
    InvalidIceServer { id: String, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("logger setup failed: {0}")]
    Logger(String),
}
