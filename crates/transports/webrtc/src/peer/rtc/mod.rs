//! Connection-establishment backend
//!
//! Peer records drive the backend only through these traits, so the
//! negotiation logic runs the same against webrtc-rs and the in-memory mock.
//! Every backend callback is delivered as an [`RtcEvent`] on the channel
//! returned by [`RtcConnector::create`], in the order the backend produced it.

mod native;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use native::WebRtcConnector;

use super::ConnectionState;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use peerlink_protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback from the backend for one session
#[derive(Clone)]
pub enum RtcEvent {
    /// Local ICE candidate gathered
    LocalCandidate(IceCandidate),
    /// Underlying connection state changed
    ConnectionState(ConnectionState),
    /// Remote side opened a data channel toward us
    DataChannelAnnounced(Arc<dyn DataChannel>),
    /// The session's data channel opened
    ChannelOpen,
    /// The session's data channel closed
    ChannelClosed,
    /// Message received on the data channel
    Message(Bytes),
}

impl std::fmt::Debug for RtcEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtcEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            RtcEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
            RtcEvent::DataChannelAnnounced(ch) => {
                f.debug_tuple("DataChannelAnnounced").field(&ch.label()).finish()
            }
            RtcEvent::ChannelOpen => f.write_str("ChannelOpen"),
            RtcEvent::ChannelClosed => f.write_str("ChannelClosed"),
            RtcEvent::Message(data) => write!(f, "Message({} bytes)", data.len()),
        }
    }
}

/// Creates one backend session per negotiation
#[async_trait]
pub trait RtcConnector: Send + Sync {
    async fn create(
        &self,
        peer_id: &str,
    ) -> Result<(Arc<dyn RtcSession>, mpsc::UnboundedReceiver<RtcEvent>)>;
}

/// One underlying peer connection
#[async_trait]
pub trait RtcSession: Send + Sync {
    /// Create the outbound data channel (offering side)
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    /// Create an offer and set it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an answer and set it as the local description
    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Direct message channel between two peers
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send(&self, data: Bytes) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
