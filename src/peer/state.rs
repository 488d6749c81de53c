use std::sync::Arc;

use crate::peer::ice::{CandidateQueue, CandidateStats};
use crate::peer::link::PeerLink;
use crate::peer::media::LocalStream;
use crate::peer::types::{CallId, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// Offer sent, waiting for the partner.
    Requesting,
    /// Accepted an incoming call, waiting for the partner's offer.
    Ringing,
    /// Descriptions exchanged, link not usable yet.
    Negotiating,
    Active,
    /// Teardown in progress.
    Ending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Call offered by the partner that has not been accepted or rejected yet.
///
/// No resources are held for it; an offer that races ahead of the local
/// decision is parked here.
#[derive(Debug)]
pub struct IncomingCall {
    pub call_id: CallId,
    pub offer: Option<SessionDescription>,
    pub waited_secs: u64,
}

/// Call whose media and peer link are being prepared off the dispatch loop.
///
/// Like [`IncomingCall`] it holds no resources itself; they are installed
/// when the preparation reports back. An offer arriving meanwhile is parked.
#[derive(Debug)]
pub struct PendingSetup {
    pub call_id: CallId,
    pub role: CallRole,
    pub offer: Option<SessionDescription>,
}

/// Audio call nested in a chat pairing.
///
/// `peer_link` is set iff `phase` is neither Idle nor Ending;
/// `local_stream` is set iff `phase` is not Idle.
pub struct CallSession {
    pub(crate) phase: CallPhase,
    pub(crate) call_id: Option<CallId>,
    pub(crate) role: Option<CallRole>,
    pub(crate) local_stream: Option<LocalStream>,
    pub(crate) peer_link: Option<Arc<dyn PeerLink>>,
    pub(crate) pending_remote_candidates: CandidateQueue,
    pub(crate) muted: bool,
    pub(crate) elapsed_seconds: u64,
    pub(crate) incoming: Option<IncomingCall>,
    pub(crate) setup: Option<PendingSetup>,
    /// Set once call-request or call-accepted went out, so teardown knows
    /// whether the partner has to be told.
    pub(crate) announced: bool,
    /// Seconds spent in the current Disconnected spell.
    pub(crate) degraded_secs: Option<u64>,
    pub(crate) local_candidates: CandidateStats,
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            phase: CallPhase::Idle,
            call_id: None,
            role: None,
            local_stream: None,
            peer_link: None,
            pending_remote_candidates: CandidateQueue::new(),
            muted: false,
            elapsed_seconds: 0,
            incoming: None,
            setup: None,
            announced: false,
            degraded_secs: None,
            local_candidates: CandidateStats::default(),
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn role(&self) -> Option<CallRole> {
        self.role
    }

    pub fn is_idle(&self) -> bool {
        self.phase == CallPhase::Idle
    }

    pub fn has_local_stream(&self) -> bool {
        self.local_stream.is_some()
    }

    pub fn has_peer_link(&self) -> bool {
        self.peer_link.is_some()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_remote_candidates.len()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn incoming(&self) -> Option<&IncomingCall> {
        self.incoming.as_ref()
    }

    pub fn setup(&self) -> Option<&PendingSetup> {
        self.setup.as_ref()
    }

    /// No call of any kind: not established, not offered, not being set up.
    pub fn is_vacant(&self) -> bool {
        self.is_idle() && self.incoming.is_none() && self.setup.is_none()
    }

    /// True when `id` names the call this session is working on: an
    /// established one, an undecided incoming one or one being set up.
    pub fn owns(&self, id: &CallId) -> bool {
        self.call_id.as_ref() == Some(id)
            || self.incoming.as_ref().map(|c| &c.call_id) == Some(id)
            || self.setup.as_ref().map(|s| &s.call_id) == Some(id)
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("phase", &self.phase)
            .field("call_id", &self.call_id)
            .field("role", &self.role)
            .field("local_stream", &self.local_stream)
            .field("peer_link", &self.peer_link.is_some())
            .field("pending", &self.pending_remote_candidates.len())
            .field("muted", &self.muted)
            .field("elapsed_seconds", &self.elapsed_seconds)
            .field("incoming", &self.incoming)
            .field("setup", &self.setup)
            .finish()
    }
}
