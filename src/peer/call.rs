use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::events::{ClientEvent, Emitter, EndReason};
use crate::logger::dump_candidate;
use crate::peer::ice::{apply_pending_candidates, Admission};
use crate::peer::link::{LinkEvent, LinkEventKind, LinkState, PeerLink, PeerLinkFactory};
use crate::peer::media::{LocalStream, MediaCapability};
use crate::peer::state::{CallPhase, CallRole, CallSession, IncomingCall, PendingSetup};
use crate::peer::types::{CallId, IceCandidate, SdpPayload, ServerConfig, SessionDescription};
use crate::signaling::{CallRef, OutboundEvent, SignalingSink};
use crate::utils::random_id;

/// Timing knobs for the call engine
#[derive(Debug, Clone, Copy)]
pub struct CallTimings {
    /// Seconds an undecided incoming call may ring; `None` waits forever.
    pub ring_timeout_secs: Option<u64>,
    /// Seconds a Disconnected link gets to come back before teardown.
    pub grace_period_secs: u64,
}

impl Default for CallTimings {
    fn default() -> Self {
        Self {
            ring_timeout_secs: None,
            grace_period_secs: 10,
        }
    }
}

/// Where work running outside the dispatch loop reports back
#[derive(Clone)]
pub struct EngineChannels {
    pub link_events: mpsc::UnboundedSender<LinkEvent>,
    pub setups: mpsc::UnboundedSender<SetupOutcome>,
}

pub struct EngineReceivers {
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    pub setups: mpsc::UnboundedReceiver<SetupOutcome>,
}

impl EngineChannels {
    pub fn new() -> (Self, EngineReceivers) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (setup_tx, setup_rx) = mpsc::unbounded_channel();
        (
            Self {
                link_events: link_tx,
                setups: setup_tx,
            },
            EngineReceivers {
                link_events: link_rx,
                setups: setup_rx,
            },
        )
    }
}

/// Microphone and peer link made ready for a call
pub struct PreparedCall {
    stream: LocalStream,
    link: Arc<dyn PeerLink>,
    /// Local offer, already installed on the link. Caller side only.
    offer: Option<SessionDescription>,
}

impl fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCall")
            .field("stream", &self.stream)
            .field("offer", &self.offer.as_ref().map(|o| o.kind))
            .finish()
    }
}

/// Result of a call setup, tagged with the call it was started for
#[derive(Debug)]
pub struct SetupOutcome {
    pub call_id: CallId,
    pub result: Result<PreparedCall, CallError>,
}

/// Drives the audio call lifecycle for one [`CallSession`].
///
/// The engine holds the capabilities; the session holds the state. Every
/// operation runs to completion inside one dispatch turn, so operations on a
/// session never interleave. Acquiring the microphone and building the link
/// are the exception: they run as a spawned task that reports back through
/// [`EngineChannels::setups`].
pub struct CallEngine {
    media: Arc<dyn MediaCapability>,
    links: Arc<dyn PeerLinkFactory>,
    signaling: Arc<dyn SignalingSink>,
    emitter: Emitter,
    ice_servers: Arc<[ServerConfig]>,
    channels: EngineChannels,
    timings: CallTimings,
}

impl CallEngine {
    pub fn new(
        media: Arc<dyn MediaCapability>,
        links: Arc<dyn PeerLinkFactory>,
        signaling: Arc<dyn SignalingSink>,
        emitter: Emitter,
        ice_servers: Vec<ServerConfig>,
        channels: EngineChannels,
        timings: CallTimings,
    ) -> Self {
        Self {
            media,
            links,
            signaling,
            emitter,
            ice_servers: ice_servers.into(),
            channels,
            timings,
        }
    }

    // ---------- setup ----------

    /// Starts preparing a call in the background. The call is announced
    /// once [`CallEngine::on_setup_finished`] sees the result.
    pub fn start_call(&self, call: &mut CallSession) -> Result<(), CallError> {
        if !call.is_vacant() {
            return Err(CallError::InvalidPhase {
                op: "start_call",
                phase: call.phase,
            });
        }

        let call_id = CallId::new(random_id());
        info!(%call_id, "starting call");
        self.begin_setup(call, call_id, CallRole::Caller, None);
        Ok(())
    }

    /// Accepts the undecided incoming call; preparation runs in the
    /// background like [`CallEngine::start_call`].
    pub fn accept_call(&self, call: &mut CallSession) -> Result<(), CallError> {
        let incoming = match (call.phase, call.incoming.take()) {
            (CallPhase::Idle, Some(incoming)) => incoming,
            (phase, other) => {
                call.incoming = other;
                return Err(CallError::InvalidPhase {
                    op: "accept_call",
                    phase,
                });
            }
        };
        info!(call_id = %incoming.call_id, "accepting call");
        self.begin_setup(call, incoming.call_id, CallRole::Callee, incoming.offer);
        Ok(())
    }

    fn begin_setup(
        &self,
        call: &mut CallSession,
        call_id: CallId,
        role: CallRole,
        offer: Option<SessionDescription>,
    ) {
        call.setup = Some(PendingSetup {
            call_id: call_id.clone(),
            role,
            offer,
        });

        let media = self.media.clone();
        let links = self.links.clone();
        let ice_servers = self.ice_servers.clone();
        let channels = self.channels.clone();
        tokio::spawn(async move {
            let result = prepare(
                media.as_ref(),
                links.as_ref(),
                &ice_servers,
                channels.link_events,
                &call_id,
                role,
            )
            .await;
            if let Err(mpsc::error::SendError(outcome)) =
                channels.setups.send(SetupOutcome { call_id, result })
            {
                debug!(call_id = %outcome.call_id, "dispatch loop gone, dropping call setup");
                if let Ok(prepared) = outcome.result {
                    discard(media.as_ref(), prepared).await;
                }
            }
        });
    }

    /// Installs what a background setup produced and announces the call.
    ///
    /// A result for a call that is no longer pending is released on the
    /// spot.
    pub async fn on_setup_finished(
        &self,
        call: &mut CallSession,
        outcome: SetupOutcome,
    ) -> Result<(), CallError> {
        let pending = match call.setup.take() {
            Some(pending) if pending.call_id == outcome.call_id => pending,
            other => {
                call.setup = other;
                self.abandon_setup(outcome).await;
                return Ok(());
            }
        };
        let call_id = pending.call_id;

        let prepared = match outcome.result {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(%call_id, error = %e, "call setup failed");
                call.pending_remote_candidates.clear();
                if pending.role == CallRole::Callee {
                    self.decline(&call_id);
                }
                return Err(e);
            }
        };

        call.phase = match pending.role {
            CallRole::Caller => CallPhase::Requesting,
            CallRole::Callee => CallPhase::Ringing,
        };
        call.call_id = Some(call_id.clone());
        call.role = Some(pending.role);
        self.media.bind_local_audio_sink(&prepared.stream);
        call.local_stream = Some(prepared.stream);
        call.peer_link = Some(prepared.link);

        let announced = match (pending.role, prepared.offer) {
            (CallRole::Caller, Some(offer)) => self.announce_offer(&call_id, offer),
            (CallRole::Caller, None) => Err(CallError::Negotiation("no local offer".into())),
            (CallRole::Callee, _) => self
                .signaling
                .send(OutboundEvent::CallAccepted(call_id.clone().into()))
                .map_err(CallError::from),
        };
        if let Err(e) = announced {
            warn!(%call_id, error = %e, "could not announce call");
            self.end_call(call, EndReason::SetupFailed).await;
            return Err(e);
        }
        call.announced = true;

        match pending.role {
            CallRole::Caller => self.emitter.emit(ClientEvent::CallRequested { call_id }),
            CallRole::Callee => {
                self.emitter.emit(ClientEvent::CallAccepted {
                    call_id: call_id.clone(),
                });
                if let Some(offer) = pending.offer {
                    debug!(%call_id, "applying offer that arrived before accept");
                    self.on_remote_offer(
                        call,
                        SdpPayload {
                            call_id,
                            description: offer,
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Releases a setup result nobody is waiting for any more.
    pub async fn abandon_setup(&self, outcome: SetupOutcome) {
        debug!(call_id = %outcome.call_id, "discarding setup of a call that is gone");
        if let Ok(prepared) = outcome.result {
            discard(self.media.as_ref(), prepared).await;
        }
    }

    fn announce_offer(&self, call_id: &CallId, offer: SessionDescription) -> Result<(), CallError> {
        self.signaling
            .send(OutboundEvent::CallRequest(call_id.clone().into()))?;
        self.signaling.send(OutboundEvent::Offer(SdpPayload {
            call_id: call_id.clone(),
            description: offer,
        }))?;
        Ok(())
    }

    // ---------- caller path ----------

    /// Partner accepted our request; the answer follows separately.
    pub fn on_call_connected(&self, call: &CallSession, r: &CallRef) -> Result<(), CallError> {
        if call.phase != CallPhase::Requesting || call.call_id.as_ref() != Some(&r.call_id) {
            return Err(CallError::ProtocolViolation(format!(
                "call-connected for {} while {:?}",
                r.call_id, call.phase
            )));
        }
        info!(call_id = %r.call_id, "partner accepted call");
        self.emitter.emit(ClientEvent::CallAccepted {
            call_id: r.call_id.clone(),
        });
        Ok(())
    }

    pub async fn on_remote_answer(
        &self,
        call: &mut CallSession,
        payload: SdpPayload,
    ) -> Result<(), CallError> {
        let link = match (&call.peer_link, call.role, call.phase) {
            (Some(link), Some(CallRole::Caller), CallPhase::Requesting)
                if call.call_id.as_ref() == Some(&payload.call_id) =>
            {
                link.clone()
            }
            _ => {
                return Err(CallError::ProtocolViolation(format!(
                    "answer for {} while {:?}",
                    payload.call_id, call.phase
                )))
            }
        };

        if let Err(e) = link.set_remote_description(&payload.description).await {
            warn!(call_id = %payload.call_id, error = %e, "failed to install answer");
            self.end_call(call, EndReason::SetupFailed).await;
            return Err(e);
        }
        let applied =
            apply_pending_candidates(link.as_ref(), &mut call.pending_remote_candidates).await;
        debug!(applied, "remote answer installed");

        call.phase = CallPhase::Negotiating;
        self.emitter.emit(ClientEvent::CallNegotiating {
            call_id: payload.call_id,
        });
        Ok(())
    }

    // ---------- callee path ----------

    /// Partner wants to call; opens the accept/reject decision point.
    pub fn on_incoming_call(&self, call: &mut CallSession, r: CallRef) -> Result<(), CallError> {
        if call.owns(&r.call_id) {
            debug!(call_id = %r.call_id, "repeated call-incoming ignored");
            return Ok(());
        }
        if !call.is_vacant() {
            info!(call_id = %r.call_id, phase = ?call.phase, "busy, rejecting incoming call");
            self.signaling.send(OutboundEvent::CallRejected(r))?;
            return Ok(());
        }

        info!(call_id = %r.call_id, "incoming call");
        call.incoming = Some(IncomingCall {
            call_id: r.call_id.clone(),
            offer: None,
            waited_secs: 0,
        });
        self.emitter
            .emit(ClientEvent::IncomingCall { call_id: r.call_id });
        Ok(())
    }

    pub fn reject_call(&self, call: &mut CallSession) -> Result<(), CallError> {
        let Some(incoming) = call.incoming.take() else {
            return Err(CallError::InvalidPhase {
                op: "reject_call",
                phase: call.phase,
            });
        };
        info!(call_id = %incoming.call_id, "rejecting call");
        call.pending_remote_candidates.clear();
        self.decline(&incoming.call_id);
        self.emitter.emit(ClientEvent::CallEnded {
            reason: EndReason::Declined,
        });
        Ok(())
    }

    fn decline(&self, call_id: &CallId) {
        if let Err(e) = self
            .signaling
            .send(OutboundEvent::CallRejected(call_id.clone().into()))
        {
            warn!(%call_id, error = %e, "could not relay call-rejected");
        }
    }

    pub async fn on_remote_offer(
        &self,
        call: &mut CallSession,
        payload: SdpPayload,
    ) -> Result<(), CallError> {
        if let Some(slot) = parked_offer(call, &payload.call_id) {
            debug!(call_id = %payload.call_id, "offer parked until the call is set up");
            *slot = Some(payload.description);
            return Ok(());
        }

        let link = match (&call.peer_link, call.role, call.phase) {
            (Some(link), Some(CallRole::Callee), CallPhase::Ringing)
                if call.call_id.as_ref() == Some(&payload.call_id) =>
            {
                link.clone()
            }
            _ => {
                return Err(CallError::ProtocolViolation(format!(
                    "offer for {} while {:?}",
                    payload.call_id, call.phase
                )))
            }
        };

        let answer = match answer_offer(link.as_ref(), &payload.description).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(call_id = %payload.call_id, error = %e, "failed to answer offer");
                self.end_call(call, EndReason::SetupFailed).await;
                return Err(e);
            }
        };
        if let Err(e) = self.signaling.send(OutboundEvent::Answer(SdpPayload {
            call_id: payload.call_id.clone(),
            description: answer,
        })) {
            self.end_call(call, EndReason::SetupFailed).await;
            return Err(e.into());
        }

        let applied =
            apply_pending_candidates(link.as_ref(), &mut call.pending_remote_candidates).await;
        debug!(applied, "remote offer installed");

        call.phase = CallPhase::Negotiating;
        self.emitter.emit(ClientEvent::CallNegotiating {
            call_id: payload.call_id,
        });
        Ok(())
    }

    // ---------- both paths ----------

    /// Applies a remote candidate now, or buffers it until the remote
    /// description is installed.
    pub async fn on_remote_candidate(
        &self,
        call: &mut CallSession,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        if !call.owns(&candidate.call_id) {
            return Err(CallError::ProtocolViolation(format!(
                "candidate for unknown call {}",
                candidate.call_id
            )));
        }

        match call.pending_remote_candidates.admit(candidate) {
            Admission::Buffered => Ok(()),
            Admission::Apply(candidate) => {
                let Some(link) = call.peer_link.clone() else {
                    return Err(CallError::ProtocolViolation(
                        "candidate with no peer link".into(),
                    ));
                };
                if let Err(e) = link.add_ice_candidate(&candidate).await {
                    warn!(error = %e, "failed to add remote candidate");
                }
                Ok(())
            }
        }
    }

    /// Partner sent call-ended, with or without naming the call.
    pub async fn on_remote_ended(
        &self,
        call: &mut CallSession,
        r: Option<CallRef>,
    ) -> Result<(), CallError> {
        if let Some(r) = r.filter(|r| !call.owns(&r.call_id)) {
            return Err(CallError::ProtocolViolation(format!(
                "call-ended for unknown call {}",
                r.call_id
            )));
        }
        if call.is_vacant() {
            return Err(CallError::ProtocolViolation(
                "call-ended with no call".into(),
            ));
        }
        self.end_call(call, EndReason::RemoteEnded).await;
        Ok(())
    }

    /// Partner declined our request.
    pub async fn on_remote_rejected(
        &self,
        call: &mut CallSession,
        r: Option<CallRef>,
    ) -> Result<(), CallError> {
        let ours = r.as_ref().map_or(true, |r| call.owns(&r.call_id));
        if !ours || call.phase != CallPhase::Requesting {
            return Err(CallError::ProtocolViolation(format!(
                "call-rejected for {:?} while {:?}",
                r.map(|r| r.call_id),
                call.phase
            )));
        }
        self.end_call(call, EndReason::RemoteRejected).await;
        Ok(())
    }

    /// Tears the call down and releases everything it holds.
    ///
    /// No-op when already Ending or when there is no call at all. A call
    /// that is undecided or still being set up is dropped; the partner is
    /// told unless it ended the call itself or is gone.
    pub async fn end_call(&self, call: &mut CallSession, reason: EndReason) {
        match call.phase {
            CallPhase::Ending => return,
            CallPhase::Idle => {
                self.drop_pending(call, reason);
                return;
            }
            _ => {}
        }

        let call_id = call.call_id.clone();
        info!(call_id = ?call_id, ?reason, elapsed = call.elapsed_seconds, "ending call");
        call.phase = CallPhase::Ending;

        if let Some(link) = call.peer_link.take() {
            link.close().await;
        }
        if let Some(stream) = call.local_stream.take() {
            self.media.release_stream(stream);
        }
        call.pending_remote_candidates.clear();

        if call.announced && !reason.is_remote() {
            if let Some(id) = call_id {
                if let Err(e) = self.signaling.send(OutboundEvent::CallEnded(id.into())) {
                    warn!(error = %e, "could not relay call-ended");
                }
            }
        }

        call.reset();
        self.emitter.emit(ClientEvent::CallEnded { reason });
    }

    /// Drops an undecided or still preparing call. The setup task's result
    /// is released when it arrives.
    fn drop_pending(&self, call: &mut CallSession, reason: EndReason) {
        let undecided = call.incoming.take().map(|c| c.call_id);
        let preparing = call.setup.take();
        if undecided.is_none() && preparing.is_none() {
            return;
        }
        call.pending_remote_candidates.clear();

        // the caller waits on our decision until call-rejected arrives
        let waiting_caller = undecided.or_else(|| {
            preparing
                .as_ref()
                .filter(|s| s.role == CallRole::Callee)
                .map(|s| s.call_id.clone())
        });
        match waiting_caller {
            Some(call_id) if !reason.is_remote() && reason != EndReason::PartnerLost => {
                debug!(%call_id, ?reason, "declining call before it was set up");
                self.decline(&call_id);
            }
            Some(call_id) => debug!(%call_id, ?reason, "dropping undecided call"),
            None => debug!(?reason, "dropping call before it was announced"),
        }
        self.emitter.emit(ClientEvent::CallEnded { reason });
    }

    pub fn toggle_mute(&self, call: &mut CallSession) -> Result<bool, CallError> {
        let Some(stream) = call.local_stream.as_ref() else {
            return Err(CallError::InvalidPhase {
                op: "toggle_mute",
                phase: call.phase,
            });
        };
        let muted = !call.muted;
        self.media.set_local_track_enabled(stream, !muted);
        call.muted = muted;
        debug!(muted, "mute toggled");
        self.emitter.emit(ClientEvent::MuteChanged { muted });
        Ok(muted)
    }

    pub async fn on_link_event(
        &self,
        call: &mut CallSession,
        event: LinkEvent,
    ) -> Result<(), CallError> {
        if call.call_id.as_ref() != Some(&event.call_id) || call.peer_link.is_none() {
            return Err(CallError::ProtocolViolation(format!(
                "link event for stale call {}",
                event.call_id
            )));
        }

        match event.kind {
            LinkEventKind::LocalCandidate(candidate) => {
                dump_candidate("LOCAL", &candidate);
                call.local_candidates.record(&candidate.candidate);
                self.signaling.send(OutboundEvent::IceCandidate(candidate))?;
            }
            LinkEventKind::GatheringComplete => {
                debug!(call_id = %event.call_id, "ICE gathering complete");
            }
            LinkEventKind::RemoteTrack(stream) => {
                info!(stream = stream.id(), "remote audio track arrived");
                self.media.bind_remote_audio_sink(stream);
            }
            LinkEventKind::StateChanged(state) => {
                debug!(call_id = %event.call_id, ?state, "peer link state changed");
                self.on_link_state(call, event.call_id, state).await;
            }
        }
        Ok(())
    }

    async fn on_link_state(&self, call: &mut CallSession, call_id: CallId, state: LinkState) {
        match state {
            LinkState::Connected => {
                if call.degraded_secs.take().is_some() {
                    info!(%call_id, "peer link recovered");
                    self.emitter.emit(ClientEvent::CallConnectionRecovered);
                }
                if call.phase == CallPhase::Negotiating {
                    call.phase = CallPhase::Active;
                    call.elapsed_seconds = 0;
                    call.local_candidates.log();
                    info!(%call_id, "call active");
                    self.emitter.emit(ClientEvent::CallActive { call_id });
                }
            }
            LinkState::Disconnected => {
                if call.degraded_secs.is_none() {
                    warn!(
                        %call_id,
                        grace = self.timings.grace_period_secs,
                        "peer link disconnected, starting grace period"
                    );
                    call.degraded_secs = Some(0);
                    self.emitter.emit(ClientEvent::CallConnectionProblem);
                }
            }
            LinkState::Failed => {
                warn!(%call_id, "peer link failed");
                self.end_call(call, EndReason::ConnectionFailed).await;
            }
            LinkState::New | LinkState::Connecting | LinkState::Closed => {}
        }
    }

    /// One-second heartbeat: call duration, grace period, ring timeout.
    pub async fn tick(&self, call: &mut CallSession) {
        if call.phase == CallPhase::Active {
            call.elapsed_seconds += 1;
            self.emitter.emit(ClientEvent::CallDuration {
                seconds: call.elapsed_seconds,
            });
        }

        if let Some(secs) = call.degraded_secs.as_mut() {
            *secs += 1;
            if *secs >= self.timings.grace_period_secs {
                warn!("peer link did not recover within grace period");
                self.end_call(call, EndReason::ConnectionFailed).await;
                return;
            }
        }

        if let (Some(limit), Some(incoming)) =
            (self.timings.ring_timeout_secs, call.incoming.as_mut())
        {
            incoming.waited_secs += 1;
            if incoming.waited_secs >= limit {
                let call_id = incoming.call_id.clone();
                info!(%call_id, "incoming call not answered in time");
                call.incoming = None;
                call.pending_remote_candidates.clear();
                self.decline(&call_id);
                self.emitter.emit(ClientEvent::CallEnded {
                    reason: EndReason::Timeout,
                });
            }
        }
    }
}

/// Acquires the microphone and builds a link carrying it. Whatever was
/// acquired is released again when a later step fails.
async fn prepare(
    media: &dyn MediaCapability,
    links: &dyn PeerLinkFactory,
    ice_servers: &[ServerConfig],
    link_events: mpsc::UnboundedSender<LinkEvent>,
    call_id: &CallId,
    role: CallRole,
) -> Result<PreparedCall, CallError> {
    let stream = media.acquire_local_audio().await?;
    let link = match links.create_link(call_id, ice_servers, link_events).await {
        Ok(link) => link,
        Err(e) => {
            media.release_stream(stream);
            return Err(e);
        }
    };
    match attach(link.as_ref(), &stream, role).await {
        Ok(offer) => Ok(PreparedCall {
            stream,
            link,
            offer,
        }),
        Err(e) => {
            link.close().await;
            media.release_stream(stream);
            Err(e)
        }
    }
}

async fn attach(
    link: &dyn PeerLink,
    stream: &LocalStream,
    role: CallRole,
) -> Result<Option<SessionDescription>, CallError> {
    link.add_local_track(stream).await?;
    if role == CallRole::Callee {
        return Ok(None);
    }
    let offer = link.create_offer().await?;
    link.set_local_description(&offer).await?;
    Ok(Some(offer))
}

async fn discard(media: &dyn MediaCapability, prepared: PreparedCall) {
    prepared.link.close().await;
    media.release_stream(prepared.stream);
}

async fn answer_offer(
    link: &dyn PeerLink,
    offer: &SessionDescription,
) -> Result<SessionDescription, CallError> {
    link.set_remote_description(offer).await?;
    let answer = link.create_answer().await?;
    link.set_local_description(&answer).await?;
    Ok(answer)
}

/// Slot for an offer that arrives before the call it belongs to has a link.
fn parked_offer<'a>(
    call: &'a mut CallSession,
    call_id: &CallId,
) -> Option<&'a mut Option<SessionDescription>> {
    match (&mut call.incoming, &mut call.setup) {
        (Some(incoming), _) if incoming.call_id == *call_id => Some(&mut incoming.offer),
        (_, Some(setup)) if setup.call_id == *call_id && setup.role == CallRole::Callee => {
            Some(&mut setup.offer)
        }
        _ => None,
    }
}
