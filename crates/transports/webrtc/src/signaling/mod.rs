//! Signaling over the rendezvous relay
//!
//! A single WebSocket connection carries every envelope we exchange with the
//! relay. [`SignalingSink`] is the one write entry point; [`Signaler`] layers
//! encoding and the registration gate on top of it.

mod client;
mod registration;

pub use client::SignalingClient;
pub use registration::{Registration, RegistrationState};

use crate::{Error, Result};
use bytes::Bytes;
use peerlink_protocol::{EnvelopeCodec, PeerSignal};
use std::sync::Arc;
use tracing::{debug, warn};

/// Event surfaced by the signaling transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// Binary envelope received from the relay
    Message(Bytes),
    /// Transport closed; emitted once, never followed by a reconnect
    Closed { reason: String },
}

/// Write side of the signaling transport
pub trait SignalingSink: Send + Sync {
    /// Queue one envelope; fails with `TransportUnavailable` when not open
    fn send(&self, data: Bytes) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Encodes peer-addressed envelopes and writes them through the sink
///
/// Sends are refused unless the transport is open and the relay has
/// acknowledged our registration.
#[derive(Clone)]
pub struct Signaler {
    codec: Arc<dyn EnvelopeCodec>,
    sink: Arc<dyn SignalingSink>,
    registration: Arc<Registration>,
}

impl Signaler {
    pub fn new(
        codec: Arc<dyn EnvelopeCodec>,
        sink: Arc<dyn SignalingSink>,
        registration: Arc<Registration>,
    ) -> Self {
        Self {
            codec,
            sink,
            registration,
        }
    }

    pub fn local_id(&self) -> &str {
        self.codec.local_id()
    }

    pub fn send_signal(&self, peer_id: &str, signal: &PeerSignal) -> Result<()> {
        self.ensure_ready(peer_id)?;
        let envelope = self.codec.encode_signal(peer_id, signal)?;
        debug!("Sending {:?} to {}", signal.kind(), peer_id);
        self.sink.send(envelope)
    }

    pub fn send_payload(&self, peer_id: &str, payload: &[u8]) -> Result<()> {
        self.ensure_ready(peer_id)?;
        let envelope = self.codec.encode_peer_payload(peer_id, payload)?;
        self.sink.send(envelope)
    }

    fn ensure_ready(&self, peer_id: &str) -> Result<()> {
        if !self.sink.is_open() {
            warn!("Signaling transport closed, dropping message for {}", peer_id);
            return Err(Error::TransportUnavailable(
                "signaling transport is not open".to_string(),
            ));
        }
        if !self.registration.is_registered() {
            warn!("Not registered yet, dropping message for {}", peer_id);
            return Err(Error::NotRegistered);
        }
        Ok(())
    }
}
