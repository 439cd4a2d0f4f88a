//! webrtc-rs backend

use super::{DataChannel, RtcConnector, RtcEvent, RtcSession};
use crate::config::{DataChannelMode, PeerLinkConfig};
use crate::peer::ConnectionState;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use peerlink_protocol::{IceCandidate, SdpType, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Production connector built on webrtc-rs
pub struct WebRtcConnector {
    ice_servers: Vec<RTCIceServer>,
    mode: DataChannelMode,
}

impl WebRtcConnector {
    pub fn new(config: &PeerLinkConfig) -> Self {
        // STUN first, then TURN relays
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        Self {
            ice_servers,
            mode: config.data_channel_mode,
        }
    }

    async fn new_peer_connection(&self) -> Result<RTCPeerConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        api.new_peer_connection(rtc_config)
            .await
            .map_err(|e| Error::WebRtc(format!("Failed to create peer connection: {}", e)))
    }
}

#[async_trait]
impl RtcConnector for WebRtcConnector {
    #[instrument(skip(self))]
    async fn create(
        &self,
        peer_id: &str,
    ) -> Result<(Arc<dyn RtcSession>, mpsc::UnboundedReceiver<RtcEvent>)> {
        let pc = Arc::new(self.new_peer_connection().await?);
        let (tx, rx) = mpsc::unbounded_channel();

        let candidate_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                // None marks end of gathering
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(RtcEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_tx = tx.clone();
        let state_peer = peer_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            let peer_id = state_peer.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::New => ConnectionState::New,
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    _ => return,
                };
                debug!("Peer {} RTC state: {:?}", peer_id, s);
                let _ = tx.send(RtcEvent::ConnectionState(state));
            })
        }));

        let channel_tx = tx.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = channel_tx.clone();
            Box::pin(async move {
                info!("Remote data channel announced: {}", dc.label());
                // Announce before wiring so ChannelOpen never precedes it
                let channel: Arc<dyn DataChannel> = Arc::new(WebRtcDataChannel {
                    label: dc.label().to_string(),
                    inner: Arc::clone(&dc),
                });
                let _ = tx.send(RtcEvent::DataChannelAnnounced(channel));
                wire_channel(&dc, tx);
            })
        }));

        let session = WebRtcSession {
            pc,
            events: tx,
            mode: self.mode,
        };
        Ok((Arc::new(session) as Arc<dyn RtcSession>, rx))
    }
}

/// Bridge data channel callbacks into the session's event stream
fn wire_channel(dc: &Arc<RTCDataChannel>, tx: mpsc::UnboundedSender<RtcEvent>) {
    let open_tx = tx.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = open_tx.send(RtcEvent::ChannelOpen);
        })
    }));

    let close_tx = tx.clone();
    dc.on_close(Box::new(move || {
        let tx = close_tx.clone();
        Box::pin(async move {
            let _ = tx.send(RtcEvent::ChannelClosed);
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(RtcEvent::Message(msg.data));
        })
    }));
}

struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<RtcEvent>,
    mode: DataChannelMode,
}

impl WebRtcSession {
    async fn local_description(&self, sdp_type: SdpType) -> Result<SessionDescription> {
        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("No local description after setting it".to_string()))?;
        Ok(SessionDescription {
            sdp_type,
            sdp: local.sdp,
        })
    }
}

#[async_trait]
impl RtcSession for WebRtcSession {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let init = RTCDataChannelInit {
            ordered: Some(self.mode.ordered()),
            max_retransmits: self.mode.max_retransmits(),
            ..Default::default()
        };

        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to create data channel: {}", e)))?;

        wire_channel(&dc, self.events.clone());

        Ok(Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            inner: dc,
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        self.local_description(SdpType::Offer).await
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        self.local_description(SdpType::Answer).await
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| Error::Sdp(format!("Failed to parse remote description: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to close connection: {}", e)))
    }
}

struct WebRtcDataChannel {
    label: String,
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        self.inner
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|e| Error::DataChannel(format!("Failed to send: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| Error::DataChannel(format!("Failed to close channel: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    #[test]
    fn test_ice_servers_from_config() {
        let config = PeerLinkConfig::new("ws://localhost:8765", "lobby", "alice").with_turn_servers(
            vec![TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            }],
        );
        let connector = WebRtcConnector::new(&config);

        assert_eq!(connector.ice_servers.len(), 2);
        assert_eq!(connector.ice_servers[0].urls, config.stun_servers);
        assert_eq!(connector.ice_servers[1].username, "user");
    }

    #[tokio::test]
    async fn test_offer_without_network() {
        let config = PeerLinkConfig::new("ws://localhost:8765", "lobby", "alice")
            .with_stun_servers(vec![]);
        let connector = WebRtcConnector::new(&config);
        let (session, _events) = connector.create("bob").await.unwrap();

        let channel = session.create_data_channel("peerlink").await.unwrap();
        assert_eq!(channel.label(), "peerlink");

        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("application"));

        session.close().await.unwrap();
    }
}
