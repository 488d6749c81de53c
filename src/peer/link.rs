use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CallError;
use crate::peer::media::{LocalStream, RemoteStream};
use crate::peer::types::{CallId, IceCandidate, ServerConfig, SessionDescription};

/// Connection health as reported by the peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug)]
pub enum LinkEventKind {
    /// Trickled local candidate, to be relayed to the partner.
    LocalCandidate(IceCandidate),
    GatheringComplete,
    StateChanged(LinkState),
    RemoteTrack(RemoteStream),
}

/// Event raised by a peer link, tagged with the call that owns the link
#[derive(Debug)]
pub struct LinkEvent {
    pub call_id: CallId,
    pub kind: LinkEventKind,
}

/// One direct connection to the partner.
///
/// Implementations must reject `create_answer` and `add_ice_candidate`
/// while no remote description is installed.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn add_local_track(&self, stream: &LocalStream) -> Result<(), CallError>;
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError>;
    async fn close(&self);
}

/// Creates peer links; candidate, state and track callbacks are delivered
/// as [`LinkEvent`]s on `events`.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create_link(
        &self,
        call_id: &CallId,
        ice_servers: &[ServerConfig],
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>, CallError>;
}
