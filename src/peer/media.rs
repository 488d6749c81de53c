use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::error::CallError;
use crate::utils::random_id;

/// Microphone stream held for the duration of one call
pub struct LocalStream {
    id: String,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: id.into(),
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Opus track with no capture behind it yet
    pub fn opus(id: impl Into<String>) -> Self {
        let id = id.into();
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            format!("audio-{id}"),
            "randchat".to_owned(),
        ));
        Self::new(id, track)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Feeds one captured frame to the track; dropped while muted.
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, CallError> {
        if !self.is_enabled() {
            return Ok(false);
        }
        self.track
            .write_sample(sample)
            .await
            .map_err(CallError::link)?;
        Ok(true)
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Audio arriving from the partner
pub struct RemoteStream {
    id: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteStream {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            track: Some(track),
        }
    }

    /// Stream handle without an RTP source behind it.
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            track: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track(&self) -> Option<&Arc<TrackRemote>> {
        self.track.as_ref()
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("attached", &self.track.is_some())
            .finish()
    }
}

/// Access to the local microphone and to audio output.
///
/// `release_stream` takes the stream by value, so a stream can only be
/// released once.
#[async_trait]
pub trait MediaCapability: Send + Sync {
    async fn acquire_local_audio(&self) -> Result<LocalStream, CallError>;
    fn release_stream(&self, stream: LocalStream);
    fn set_local_track_enabled(&self, stream: &LocalStream, enabled: bool);
    fn bind_local_audio_sink(&self, stream: &LocalStream);
    fn bind_remote_audio_sink(&self, stream: RemoteStream);
}

/// Media capability backed by webrtc tracks.
///
/// Capture devices live outside this crate: they push frames through
/// [`LocalStream::write_sample`]. Remote RTP payloads are forwarded to
/// `playback` when one is configured.
pub struct TrackMedia {
    playback: Option<mpsc::UnboundedSender<Bytes>>,
}

impl TrackMedia {
    pub fn new(playback: Option<mpsc::UnboundedSender<Bytes>>) -> Self {
        Self { playback }
    }
}

#[async_trait]
impl MediaCapability for TrackMedia {
    async fn acquire_local_audio(&self) -> Result<LocalStream, CallError> {
        let stream = LocalStream::opus(random_id());
        info!(stream = stream.id(), "local audio acquired");
        Ok(stream)
    }

    fn release_stream(&self, stream: LocalStream) {
        stream.set_enabled(false);
        info!(stream = stream.id(), "local audio released");
    }

    fn set_local_track_enabled(&self, stream: &LocalStream, enabled: bool) {
        debug!(stream = stream.id(), enabled, "local track enabled flag changed");
        stream.set_enabled(enabled);
    }

    fn bind_local_audio_sink(&self, stream: &LocalStream) {
        debug!(stream = stream.id(), "local audio sink bound");
    }

    fn bind_remote_audio_sink(&self, stream: RemoteStream) {
        let Some(track) = stream.track().cloned() else {
            debug!(stream = stream.id(), "remote stream has no source, nothing to play");
            return;
        };
        let playback = self.playback.clone();
        let id = stream.id().to_owned();
        info!(stream = %id, "remote audio sink bound");

        tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                if let Some(out) = &playback {
                    if out.send(packet.payload).is_err() {
                        break;
                    }
                }
            }
            debug!(stream = %id, "remote audio ended");
        });
    }
}
