//! webrtc-rs peer session
//!
//! Production implementation of [`PeerSession`] on the `webrtc` crate:
//! default codecs and interceptors, STUN/TURN from [`CallConfig`], candidate
//! and state callbacks bridged onto the event channel.

use super::{IceCandidate, PeerEvent, PeerEventReceiver, PeerFactory, PeerSession, PeerState};
use crate::config::CallConfig;
use crate::media::{LocalMedia, RtcMediaTrack};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

/// Factory producing webrtc-rs sessions
#[derive(Default)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        config: &CallConfig,
    ) -> Result<(Arc<dyn PeerSession>, PeerEventReceiver)> {
        let (session, events) = RtcPeerSession::new(config).await?;
        Ok((Arc::new(session), events))
    }
}

/// Peer session backed by a webrtc-rs `RTCPeerConnection`
pub struct RtcPeerSession {
    session_id: String,
    peer_connection: Arc<RTCPeerConnection>,

    /// RTP senders retained so attached tracks are not cleaned up early
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl RtcPeerSession {
    /// Create a new session and the receiver for its events
    pub async fn new(config: &CallConfig) -> Result<(Self, PeerEventReceiver)> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::Negotiation(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::Negotiation(format!("Failed to create peer connection: {}", e))
        })?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let candidate_tx = event_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(json) => {
                        let _ = candidate_tx.send(PeerEvent::LocalCandidate(IceCandidate {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_m_line_index: json.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_tx = event_tx;
        let state_session = session_id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                let session_id = state_session.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => PeerState::New,
                        RTCPeerConnectionState::Connecting => PeerState::Connecting,
                        RTCPeerConnectionState::Connected => PeerState::Connected,
                        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                        RTCPeerConnectionState::Failed => PeerState::Failed,
                        RTCPeerConnectionState::Closed => PeerState::Closed,
                        _ => return,
                    };
                    debug!("Peer session {} state: {:?}", session_id, state);
                    let _ = state_tx.send(PeerEvent::StateChange(state));
                })
            },
        ));

        info!("Created peer session {}", session_id);

        Ok((
            Self {
                session_id,
                peer_connection,
                senders: Mutex::new(Vec::new()),
            },
            event_rx,
        ))
    }

    /// Session identifier, unique per call attempt
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::Negotiation("No local description after setting offer".to_string())
            })?;

        debug!("Created offer for session {}", self.session_id);
        Ok(local_desc.sdp)
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::Negotiation(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::Negotiation("No local description after setting answer".to_string())
            })?;

        debug!("Created answer for session {}", self.session_id);
        Ok(local_desc.sdp)
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| Error::Negotiation(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to set remote description: {}", e)))?;

        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn attach_media(&self, media: &LocalMedia) -> Result<()> {
        for track in media.tracks() {
            let rtc_track = track
                .as_any()
                .downcast_ref::<RtcMediaTrack>()
                .ok_or_else(|| {
                    Error::Negotiation("media handle is not webrtc-backed".to_string())
                })?;

            let sender = self
                .peer_connection
                .add_track(rtc_track.sample_track() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| Error::Negotiation(format!("Failed to add track: {}", e)))?;

            self.senders.lock().await.push(sender);
        }

        debug!(
            "Attached {} local tracks to session {}",
            media.track_count(),
            self.session_id
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer session {}", self.session_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Negotiation(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConstraints;
    use crate::media::{MediaSource, RtcMediaSource};

    #[tokio::test]
    async fn test_create_offer_includes_attached_media() {
        let config = CallConfig::default();
        let (session, _events) = RtcPeerSession::new(&config).await.unwrap();

        let media = RtcMediaSource
            .capture(&MediaConstraints::default())
            .await
            .unwrap();
        session.attach_media(&media).await.unwrap();

        let sdp = session.create_offer().await.unwrap();
        assert!(sdp.contains("audio"));
        assert!(sdp.contains("video"));
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_sessions() {
        let config = CallConfig::default();
        let (caller, _caller_events) = RtcPeerSession::new(&config).await.unwrap();
        let (callee, _callee_events) = RtcPeerSession::new(&config).await.unwrap();

        let media = RtcMediaSource
            .capture(&MediaConstraints::default())
            .await
            .unwrap();
        caller.attach_media(&media).await.unwrap();

        let offer = caller.create_offer().await.unwrap();
        callee.apply_remote_offer(&offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        caller.apply_remote_answer(&answer).await.unwrap();

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_offer_is_rejected() {
        let config = CallConfig::default();
        let (session, _events) = RtcPeerSession::new(&config).await.unwrap();

        let result = session.apply_remote_offer("not an sdp").await;
        assert!(matches!(result, Err(Error::Negotiation(_))));
    }
}
