use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::CallError;
use crate::events::{ClientEvent, Emitter, EndReason};
use crate::peer::call::{CallEngine, SetupOutcome};
use crate::peer::link::LinkEvent;
use crate::peer::state::CallSession;
use crate::signaling::{InboundEvent, OutboundEvent, SignalingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    Idle,
    Waiting,
    FindingMatch,
    Chatting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub origin: MessageOrigin,
}

/// The call lives inside the Chatting state, so it cannot outlive the pairing.
#[derive(Debug)]
enum PairingState {
    Idle,
    Waiting,
    FindingMatch,
    Chatting { partner_id: String, call: CallSession },
}

impl PairingState {
    fn status(&self) -> PairingStatus {
        match self {
            PairingState::Idle => PairingStatus::Idle,
            PairingState::Waiting => PairingStatus::Waiting,
            PairingState::FindingMatch => PairingStatus::FindingMatch,
            PairingState::Chatting { .. } => PairingStatus::Chatting,
        }
    }
}

#[derive(Debug)]
pub struct PairingSession {
    state: PairingState,
    messages: Vec<ChatMessage>,
    interests: BTreeSet<String>,
}

impl Default for PairingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingSession {
    pub fn new() -> Self {
        Self {
            state: PairingState::Idle,
            messages: Vec::new(),
            interests: BTreeSet::new(),
        }
    }

    pub fn status(&self) -> PairingStatus {
        self.state.status()
    }

    pub fn partner_id(&self) -> Option<&str> {
        match &self.state {
            PairingState::Chatting { partner_id, .. } => Some(partner_id),
            _ => None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn call(&self) -> Option<&CallSession> {
        match &self.state {
            PairingState::Chatting { call, .. } => Some(call),
            _ => None,
        }
    }

    fn call_mut(&mut self) -> Result<&mut CallSession, CallError> {
        match &mut self.state {
            PairingState::Chatting { call, .. } => Ok(call),
            _ => Err(CallError::NotChatting),
        }
    }

    /// Interest set of the last match request
    pub fn interests(&self) -> &BTreeSet<String> {
        &self.interests
    }
}

/// Owns the pairing state and routes everything that touches it.
///
/// Call operations are delegated to the [`CallEngine`] with the call that is
/// nested in the current pairing.
pub struct PairingController {
    session: PairingSession,
    engine: CallEngine,
    signaling: Arc<dyn SignalingSink>,
    emitter: Emitter,
}

impl PairingController {
    pub fn new(engine: CallEngine, signaling: Arc<dyn SignalingSink>, emitter: Emitter) -> Self {
        Self {
            session: PairingSession::new(),
            engine,
            signaling,
            emitter,
        }
    }

    pub fn session(&self) -> &PairingSession {
        &self.session
    }

    pub fn status(&self) -> PairingStatus {
        self.session.status()
    }

    /// Replaces the pairing state. Any nested call must already be torn down.
    fn transition(&mut self, next: PairingState) {
        let before = self.session.state.status();
        self.session.state = next;
        self.session.messages.clear();

        let after = self.session.state.status();
        if before != after {
            debug!(?before, ?after, "pairing state changed");
            self.emitter.emit(ClientEvent::StatusChanged(after));
        }
    }

    async fn end_nested_call(&mut self, reason: EndReason) {
        if let PairingState::Chatting { call, .. } = &mut self.session.state {
            self.engine.end_call(call, reason).await;
        }
    }

    // ---------- pairing ----------

    /// Announces `interests` and starts looking for a partner.
    ///
    /// Ignored while chatting or already matching.
    pub fn request_match(&mut self, interests: BTreeSet<String>) -> Result<(), CallError> {
        match self.session.state {
            PairingState::Chatting { .. } | PairingState::FindingMatch => {
                debug!(status = ?self.status(), "match request ignored");
                return Ok(());
            }
            PairingState::Idle | PairingState::Waiting => {}
        }

        info!(?interests, "looking for a partner");
        self.signaling
            .send(OutboundEvent::SetInterests(interests.clone()))?;
        self.session.interests = interests;
        self.transition(PairingState::FindingMatch);
        Ok(())
    }

    pub async fn on_waiting(&mut self) {
        self.end_nested_call(EndReason::PartnerLost).await;
        self.transition(PairingState::Waiting);
    }

    pub async fn on_matched(&mut self, partner_id: String) {
        // a new match always replaces the previous pairing
        self.end_nested_call(EndReason::PartnerLost).await;
        info!(%partner_id, "matched");
        self.transition(PairingState::Chatting {
            partner_id: partner_id.clone(),
            call: CallSession::new(),
        });
        self.emitter.emit(ClientEvent::Matched { partner_id });
    }

    pub async fn on_partner_lost(&mut self) {
        if let Some(partner_id) = self.session.partner_id() {
            info!(%partner_id, "partner left");
        }
        self.end_nested_call(EndReason::PartnerLost).await;
        self.transition(PairingState::Waiting);
    }

    /// Sends a chat line. Returns `false` when nothing was sent: the text is
    /// blank or there is no partner.
    pub fn send_text(&mut self, text: &str) -> Result<bool, CallError> {
        if !matches!(self.session.state, PairingState::Chatting { .. }) {
            debug!("text dropped, not chatting");
            return Ok(false);
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        self.signaling
            .send(OutboundEvent::SendMessage(text.to_owned()))?;
        self.push_message(text.to_owned(), MessageOrigin::Local);
        Ok(true)
    }

    pub fn on_text(&mut self, text: String) {
        if !matches!(self.session.state, PairingState::Chatting { .. }) {
            warn!("message received while not chatting, dropped");
            return;
        }
        self.push_message(text, MessageOrigin::Remote);
    }

    fn push_message(&mut self, text: String, origin: MessageOrigin) {
        self.session.messages.push(ChatMessage {
            text: text.clone(),
            origin,
        });
        self.emitter.emit(ClientEvent::Message { text, origin });
    }

    /// Leaves the current partner, or stops waiting for one.
    pub async fn disconnect(&mut self) -> Result<(), CallError> {
        if matches!(self.session.state, PairingState::Idle) {
            debug!("disconnect ignored, not paired");
            return Ok(());
        }

        self.end_nested_call(EndReason::Disconnected).await;
        let sent = self.signaling.send(OutboundEvent::DisconnectPartner);
        self.transition(PairingState::Waiting);
        sent.map_err(CallError::from)
    }

    /// Leaves the current partner and asks for a new one with the same
    /// interests. The departure is queued before the new match request.
    pub async fn rematch(&mut self) -> Result<(), CallError> {
        self.disconnect().await?;
        let interests = self.session.interests.clone();
        self.request_match(interests)
    }

    pub fn on_online_count(&self, count: u64) {
        self.emitter.emit(ClientEvent::OnlineCount(count));
    }

    /// Signaling channel is gone: same as losing the partner.
    pub async fn on_channel_lost(&mut self) {
        error!("signaling channel lost");
        self.end_nested_call(EndReason::PartnerLost).await;
        if !matches!(self.session.state, PairingState::Idle) {
            self.transition(PairingState::Waiting);
        }
        self.emitter.emit(ClientEvent::ChannelLost);
    }

    // ---------- call delegation ----------

    /// Begins setting up a call; the result arrives through
    /// [`PairingController::on_setup_finished`].
    pub fn start_call(&mut self) -> Result<(), CallError> {
        let call = self.session.call_mut()?;
        self.engine.start_call(call)
    }

    pub fn accept_call(&mut self) -> Result<(), CallError> {
        let call = self.session.call_mut()?;
        self.engine.accept_call(call)
    }

    /// A background call setup completed. Results for a pairing that has
    /// already ended are released.
    pub async fn on_setup_finished(&mut self, outcome: SetupOutcome) {
        let res = match &mut self.session.state {
            PairingState::Chatting { call, .. } => {
                self.engine.on_setup_finished(call, outcome).await
            }
            _ => {
                self.engine.abandon_setup(outcome).await;
                Ok(())
            }
        };
        if let Err(e) = res {
            self.report("call setup", e);
        }
    }

    pub fn reject_call(&mut self) -> Result<(), CallError> {
        let call = self.session.call_mut()?;
        self.engine.reject_call(call)
    }

    pub async fn hang_up(&mut self) -> Result<(), CallError> {
        let call = self.session.call_mut()?;
        if call.is_vacant() {
            return Err(CallError::InvalidPhase {
                op: "hang_up",
                phase: call.phase(),
            });
        }
        self.engine.end_call(call, EndReason::Hangup).await;
        Ok(())
    }

    pub fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let call = self.session.call_mut()?;
        self.engine.toggle_mute(call)
    }

    pub async fn on_link_event(&mut self, event: LinkEvent) {
        let res = match self.session.call_mut() {
            Ok(call) => self.engine.on_link_event(call, event).await,
            Err(_) => Err(CallError::ProtocolViolation(format!(
                "link event for {} with no pairing",
                event.call_id
            ))),
        };
        if let Err(e) = res {
            self.report("link event", e);
        }
    }

    /// One-second heartbeat.
    pub async fn tick(&mut self) {
        if let PairingState::Chatting { call, .. } = &mut self.session.state {
            self.engine.tick(call).await;
        }
    }

    // ---------- inbound ----------

    /// Applies one inbound signaling event.
    pub async fn on_signal(&mut self, event: InboundEvent) {
        let name = event.name();
        debug!(event = name, "signal");

        let res = match event {
            InboundEvent::Waiting => {
                self.on_waiting().await;
                Ok(())
            }
            InboundEvent::ChatStart(partner_id) => {
                self.on_matched(partner_id).await;
                Ok(())
            }
            InboundEvent::ReceiveMessage(text) => {
                self.on_text(text);
                Ok(())
            }
            InboundEvent::PartnerDisconnected => {
                self.on_partner_lost().await;
                Ok(())
            }
            InboundEvent::OnlineCount(count) => {
                self.on_online_count(count);
                Ok(())
            }
            other => self.on_call_signal(other).await,
        };

        if let Err(e) = res {
            self.report(name, e);
        }
    }

    async fn on_call_signal(&mut self, event: InboundEvent) -> Result<(), CallError> {
        let call = match &mut self.session.state {
            PairingState::Chatting { call, .. } => call,
            _ => {
                return Err(CallError::ProtocolViolation(format!(
                    "{} while not chatting",
                    event.name()
                )))
            }
        };
        let engine = &self.engine;

        match event {
            InboundEvent::CallIncoming(r) => engine.on_incoming_call(call, r),
            InboundEvent::CallConnected(r) => engine.on_call_connected(call, &r),
            InboundEvent::CallRejected(r) => engine.on_remote_rejected(call, r).await,
            InboundEvent::CallEnded(r) => engine.on_remote_ended(call, r).await,
            InboundEvent::Offer(payload) => engine.on_remote_offer(call, payload).await,
            InboundEvent::Answer(payload) => engine.on_remote_answer(call, payload).await,
            InboundEvent::IceCandidate(candidate) => {
                engine.on_remote_candidate(call, candidate).await
            }
            other => Err(CallError::ProtocolViolation(format!(
                "{} is not a call signal",
                other.name()
            ))),
        }
    }

    /// Protocol violations are only logged; other failures reach the user.
    /// Neither ends the pairing.
    pub fn report(&self, op: &str, err: CallError) {
        match err {
            CallError::ProtocolViolation(msg) => {
                warn!(op, %msg, "ignoring stray signal");
            }
            other => {
                warn!(op, error = %other, "call operation failed");
                self.emitter.emit(ClientEvent::CallFailed {
                    reason: other.to_string(),
                });
            }
        }
    }
}
