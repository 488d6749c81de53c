//! Test doubles for the signaling, media and peer-link capabilities.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::error::{CallError, SignalingError};
use crate::events::{ClientEvent, Emitter};
use crate::peer::call::{CallEngine, CallTimings, EngineChannels, SetupOutcome};
use crate::peer::link::{LinkEvent, PeerLink, PeerLinkFactory};
use crate::peer::state::CallSession;
use crate::peer::media::{LocalStream, MediaCapability, RemoteStream};
use crate::peer::types::{CallId, IceCandidate, SdpKind, ServerConfig, SessionDescription};
use crate::signaling::{OutboundEvent, SignalingSink};

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<OutboundEvent>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SignalingSink for RecordingSink {
    fn send(&self, event: OutboundEvent) -> Result<(), SignalingError> {
        self.sent.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub remote_bound: AtomicUsize,
    pub deny: AtomicBool,
    /// Parks acquisition until `gate` is notified; `entered` fires when an
    /// acquisition starts waiting.
    pub hold: AtomicBool,
    pub entered: Notify,
    pub gate: Notify,
}

#[async_trait]
impl MediaCapability for FakeMedia {
    async fn acquire_local_audio(&self) -> Result<LocalStream, CallError> {
        if self.hold.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::Permission("denied by test".into()));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalStream::opus(format!("mic-{n}")))
    }

    fn release_stream(&self, stream: LocalStream) {
        stream.set_enabled(false);
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn set_local_track_enabled(&self, stream: &LocalStream, enabled: bool) {
        stream.set_enabled(enabled);
    }

    fn bind_local_audio_sink(&self, _stream: &LocalStream) {}

    fn bind_remote_audio_sink(&self, _stream: RemoteStream) {
        self.remote_bound.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    Create(CallId),
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
pub struct FakeLinkFactory {
    ops: Arc<Mutex<Vec<LinkOp>>>,
    pub fail_create: AtomicBool,
    pub fail_offer: AtomicBool,
    pub fail_remote: AtomicBool,
    pub fail_track: AtomicBool,
}

impl FakeLinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<LinkOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, op: &LinkOp) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| *o == op).count()
    }

    fn link(&self) -> FakeLink {
        FakeLink {
            ops: self.ops.clone(),
            remote: Mutex::new(None),
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
            fail_remote: self.fail_remote.load(Ordering::SeqCst),
            fail_track: self.fail_track.load(Ordering::SeqCst),
        }
    }

    /// Link not tied to any call, for exercising link helpers directly.
    pub fn standalone_link(&self) -> Arc<dyn PeerLink> {
        Arc::new(self.link())
    }
}

#[async_trait]
impl PeerLinkFactory for FakeLinkFactory {
    async fn create_link(
        &self,
        call_id: &CallId,
        _ice_servers: &[ServerConfig],
        _events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>, CallError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::Link("create refused by test".into()));
        }
        self.ops.lock().unwrap().push(LinkOp::Create(call_id.clone()));
        Ok(Arc::new(self.link()))
    }
}

pub struct FakeLink {
    ops: Arc<Mutex<Vec<LinkOp>>>,
    remote: Mutex<Option<SdpKind>>,
    fail_offer: bool,
    fail_remote: bool,
    fail_track: bool,
}

impl FakeLink {
    fn record(&self, op: LinkOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn has_remote(&self) -> bool {
        self.remote.lock().unwrap().is_some()
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn add_local_track(&self, _stream: &LocalStream) -> Result<(), CallError> {
        if self.fail_track {
            return Err(CallError::Link("track refused by test".into()));
        }
        self.record(LinkOp::AddTrack);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        if self.fail_offer {
            return Err(CallError::Negotiation("offer refused by test".into()));
        }
        self.record(LinkOp::CreateOffer);
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        if !self.has_remote() {
            return Err(CallError::Negotiation("no remote description".into()));
        }
        self.record(LinkOp::CreateAnswer);
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.record(LinkOp::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        if self.fail_remote {
            return Err(CallError::Negotiation("remote refused by test".into()));
        }
        *self.remote.lock().unwrap() = Some(desc.kind);
        self.record(LinkOp::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        if !self.has_remote() {
            panic!("candidate applied before remote description: {candidate:?}");
        }
        self.record(LinkOp::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    async fn close(&self) {
        self.record(LinkOp::Close);
    }
}

/// Engine wired to fakes, plus handles to inspect them.
pub struct Harness {
    pub sink: Arc<RecordingSink>,
    pub media: Arc<FakeMedia>,
    pub links: Arc<FakeLinkFactory>,
    pub engine: CallEngine,
    pub emitter: Emitter,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub setups: mpsc::UnboundedReceiver<SetupOutcome>,
    pub link_events: mpsc::UnboundedReceiver<LinkEvent>,
    channels: EngineChannels,
    timings: CallTimings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timings(CallTimings::default())
    }

    pub fn with_timings(timings: CallTimings) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let media = Arc::new(FakeMedia::default());
        let links = Arc::new(FakeLinkFactory::new());
        let (emitter, events) = Emitter::channel();
        let (channels, receivers) = EngineChannels::new();
        let engine = CallEngine::new(
            media.clone(),
            links.clone(),
            sink.clone(),
            emitter.clone(),
            Vec::new(),
            channels.clone(),
            timings,
        );
        Self {
            sink,
            media,
            links,
            engine,
            emitter,
            events,
            setups: receivers.setups,
            link_events: receivers.link_events,
            channels,
            timings,
        }
    }

    /// Hands out the engine, leaving a twin wired to the same fakes and
    /// channels behind.
    pub fn take_engine(&mut self) -> CallEngine {
        let twin = CallEngine::new(
            self.media.clone(),
            self.links.clone(),
            self.sink.clone(),
            self.emitter.clone(),
            Vec::new(),
            self.channels.clone(),
            self.timings,
        );
        std::mem::replace(&mut self.engine, twin)
    }

    pub async fn next_setup(&mut self) -> SetupOutcome {
        self.setups.recv().await.expect("setup task reports back")
    }

    /// Waits for the background setup and installs its result.
    pub async fn finish_setup(&mut self, call: &mut CallSession) -> Result<(), CallError> {
        let outcome = self.next_setup().await;
        self.engine.on_setup_finished(call, outcome).await
    }

    pub async fn start_call(&mut self, call: &mut CallSession) -> Result<(), CallError> {
        self.engine.start_call(call)?;
        self.finish_setup(call).await
    }

    pub async fn accept_call(&mut self, call: &mut CallSession) -> Result<(), CallError> {
        self.engine.accept_call(call)?;
        self.finish_setup(call).await
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

pub fn candidate(call_id: &CallId, n: u32) -> IceCandidate {
    IceCandidate {
        call_id: call_id.clone(),
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}
