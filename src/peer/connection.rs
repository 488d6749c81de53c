use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::CallError;
use crate::peer::link::{LinkEvent, LinkEventKind, LinkState, PeerLink, PeerLinkFactory};
use crate::peer::media::{LocalStream, RemoteStream};
use crate::peer::types::{CallId, IceCandidate, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;

/// Builds webrtc-rs peer connections
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcLinkFactory;

#[async_trait]
impl PeerLinkFactory for RtcLinkFactory {
    async fn create_link(
        &self,
        call_id: &CallId,
        ice_servers: &[ServerConfig],
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn PeerLink>, CallError> {
        let pc = new_peer(call_id.clone(), ice_servers, events).await?;
        Ok(Arc::new(RtcPeerLink { pc }))
    }
}

/// Creates the peer connection and wires its callbacks to `events`.
async fn new_peer(
    call_id: CallId,
    ice_servers: &[ServerConfig],
    events: mpsc::UnboundedSender<LinkEvent>,
) -> Result<Arc<RTCPeerConnection>, CallError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(CallError::link)?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(CallError::link)?;
    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(
        api.new_peer_connection(rtc_config(ice_servers))
            .await
            .map_err(CallError::link)?,
    );

    let tx = events.clone();
    let id = call_id.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        let kind = match cand {
            Some(c) => match c.to_json() {
                Ok(init) => Some(LinkEventKind::LocalCandidate(IceCandidate::from_init(
                    id.clone(),
                    init,
                ))),
                Err(e) => {
                    warn!(error = %e, "failed to serialize local candidate");
                    None
                }
            },
            // None marks the end of gathering
            None => Some(LinkEventKind::GatheringComplete),
        };
        if let Some(kind) = kind {
            let _ = tx.send(LinkEvent {
                call_id: id.clone(),
                kind,
            });
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let tx = events.clone();
    let id = call_id.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        let state = match st {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => LinkState::New,
            RTCPeerConnectionState::Connecting => LinkState::Connecting,
            RTCPeerConnectionState::Connected => LinkState::Connected,
            RTCPeerConnectionState::Disconnected => LinkState::Disconnected,
            RTCPeerConnectionState::Failed => LinkState::Failed,
            RTCPeerConnectionState::Closed => LinkState::Closed,
        };
        let _ = tx.send(LinkEvent {
            call_id: id.clone(),
            kind: LinkEventKind::StateChanged(state),
        });
        Box::pin(async {})
    }));

    let tx = events;
    let id = call_id;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let _ = tx.send(LinkEvent {
                call_id: id.clone(),
                kind: LinkEventKind::RemoteTrack(RemoteStream::new(track)),
            });
            Box::pin(async {})
        },
    ));

    Ok(pc)
}

fn rtc_config(ice_servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(ice_servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Peer link backed by an `RTCPeerConnection`
pub struct RtcPeerLink {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn add_local_track(&self, stream: &LocalStream) -> Result<(), CallError> {
        let track: Arc<dyn TrackLocal + Send + Sync> = stream.track().clone();
        let sender = self.pc.add_track(track).await.map_err(CallError::link)?;

        // RTCP has to be read for interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(CallError::negotiation)?;
        SessionDescription::from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        if self.pc.remote_description().await.is_none() {
            return Err(CallError::Negotiation(
                "cannot answer before a remote offer is installed".into(),
            ));
        }
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(CallError::negotiation)?;
        SessionDescription::from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_local_description(desc.to_rtc()?)
            .await
            .map_err(CallError::negotiation)
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_remote_description(desc.to_rtc()?)
            .await
            .map_err(CallError::negotiation)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        if self.pc.remote_description().await.is_none() {
            return Err(CallError::ProtocolViolation(
                "candidate before remote description".into(),
            ));
        }
        self.pc
            .add_ice_candidate(candidate.to_init())
            .await
            .map_err(CallError::link)
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "error closing peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_servers_carry_credentials_and_scheme() {
        let servers = vec![ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        }];
        let rtc = get_user_ice_servers(&servers);
        assert_eq!(rtc.len(), 1);
        assert_eq!(rtc[0].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(rtc[0].username, "user");
        assert_eq!(rtc[0].credential, "secret");
    }

    #[tokio::test]
    async fn answer_before_offer_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = RtcLinkFactory
            .create_link(&CallId::new("t"), &[], tx)
            .await
            .unwrap();
        assert!(matches!(
            link.create_answer().await,
            Err(CallError::Negotiation(_))
        ));
        link.close().await;
    }
}
