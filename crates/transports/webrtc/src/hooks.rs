//! Application callbacks
//!
//! The orchestrator never interprets payloads. Everything it learns about
//! peers, and every payload it receives over either route, is handed to a
//! [`PeerHooks`] implementation supplied by the application.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Callbacks invoked by the orchestrator
///
/// Only [`on_payload`](PeerHooks::on_payload) is required; the rest default
/// to no-ops.
#[async_trait]
pub trait PeerHooks: Send + Sync {
    /// A payload arrived from `peer_id`, over the direct channel or the relay
    async fn on_payload(&self, peer_id: &str, payload: Bytes);

    /// The connection to `peer_id` reached Connected
    async fn on_peer_reachable(&self, _peer_id: &str) {}

    /// Another peer registered in our room
    async fn on_peer_announced(&self, _peer_id: &str) {}

    /// The signaling transport closed; it is not reopened automatically
    async fn on_signaling_closed(&self, _reason: &str) {}

    /// Durable storage finished mounting and syncing
    async fn on_storage_ready(&self) {}
}

/// Hook invocation captured by [`ChannelHooks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    Payload { peer_id: String, payload: Bytes },
    PeerReachable(String),
    PeerAnnounced(String),
    SignalingClosed(String),
    StorageReady,
}

/// [`PeerHooks`] that forwards every callback into an unbounded channel
pub struct ChannelHooks {
    tx: mpsc::UnboundedSender<HookEvent>,
}

impl ChannelHooks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HookEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: HookEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl PeerHooks for ChannelHooks {
    async fn on_payload(&self, peer_id: &str, payload: Bytes) {
        self.emit(HookEvent::Payload {
            peer_id: peer_id.to_string(),
            payload,
        });
    }

    async fn on_peer_reachable(&self, peer_id: &str) {
        self.emit(HookEvent::PeerReachable(peer_id.to_string()));
    }

    async fn on_peer_announced(&self, peer_id: &str) {
        self.emit(HookEvent::PeerAnnounced(peer_id.to_string()));
    }

    async fn on_signaling_closed(&self, reason: &str) {
        self.emit(HookEvent::SignalingClosed(reason.to_string()));
    }

    async fn on_storage_ready(&self) {
        self.emit(HookEvent::StorageReady);
    }
}
