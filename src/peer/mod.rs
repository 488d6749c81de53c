pub mod call;
pub mod connection;
pub mod ice;
pub mod link;
pub mod media;
pub mod state;
pub mod types;

pub use call::{CallEngine, CallTimings, EngineChannels, EngineReceivers, SetupOutcome};
pub use connection::RtcLinkFactory;
pub use link::{LinkEvent, LinkEventKind, LinkState, PeerLink, PeerLinkFactory};
pub use media::{LocalStream, MediaCapability, RemoteStream, TrackMedia};
pub use state::{CallPhase, CallRole, CallSession};
pub use types::{CallId, IceCandidate, SdpKind, SdpPayload, ServerConfig, SessionDescription};
