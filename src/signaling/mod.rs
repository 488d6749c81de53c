pub mod protocol;
pub mod websocket;

pub use protocol::{CallRef, InboundEvent, OutboundEvent};
pub use websocket::{WsChannel, WsSignaling};

use crate::error::SignalingError;

/// Outbound half of the signaling channel.
///
/// `send` only queues the event; events leave in the order they were
/// queued.
pub trait SignalingSink: Send + Sync {
    fn send(&self, event: OutboundEvent) -> Result<(), SignalingError>;
}
