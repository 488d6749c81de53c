use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::peer::types::CallId;
use crate::session::{MessageOrigin, PairingStatus};

/// Why a call came down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Local user hung up.
    Hangup,
    /// Partner sent call-ended.
    RemoteEnded,
    /// Partner declined the call.
    RemoteRejected,
    /// Local user declined an incoming call.
    Declined,
    /// Pairing ended underneath the call.
    PartnerLost,
    /// Local user left or rematched.
    Disconnected,
    /// Link failed or never recovered.
    ConnectionFailed,
    /// Setup step failed.
    SetupFailed,
    /// Incoming call was not answered in time.
    Timeout,
}

impl EndReason {
    /// Teardowns caused by the partner's own signal are not echoed back.
    pub fn is_remote(self) -> bool {
        matches!(self, EndReason::RemoteEnded | EndReason::RemoteRejected)
    }
}

/// Notification for whatever front end renders the chat
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StatusChanged(PairingStatus),
    Matched { partner_id: String },
    Message { text: String, origin: MessageOrigin },
    OnlineCount(u64),
    IncomingCall { call_id: CallId },
    CallRequested { call_id: CallId },
    CallAccepted { call_id: CallId },
    CallNegotiating { call_id: CallId },
    CallActive { call_id: CallId },
    CallDuration { seconds: u64 },
    CallConnectionProblem,
    CallConnectionRecovered,
    MuteChanged { muted: bool },
    CallEnded { reason: EndReason },
    CallFailed { reason: String },
    ChannelLost,
}

/// Sends [`ClientEvent`]s to the front end; a missing or closed receiver is
/// not an error.
#[derive(Clone, Default)]
pub struct Emitter {
    tx: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl Emitter {
    pub fn new(tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Emitter that drops everything.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ClientEvent) {
        trace!(?event, "emit");
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("front end gone, event dropped");
            }
        }
    }
}
