//! Envelope codec boundary
//!
//! The connection layer never touches frame bytes directly. It asks an
//! [`EnvelopeCodec`] to build registration, signal and payload envelopes and
//! to classify whatever the relay delivers.

use crate::frame::validate_identifier;
use crate::{Frame, FrameKind, PeerSignal, ProtocolError, Result};
use bytes::Bytes;

/// Classified inbound relay message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnvelope {
    /// The relay accepted our registration
    RegistrationAck,
    /// Another peer registered in our room
    PeerAnnounced { peer_id: String },
    /// Offer, answer or candidate from a peer
    Signal { from: String, signal: PeerSignal },
    /// Application payload forwarded by the relay
    RelayedPayload { from: String, payload: Bytes },
}

/// Builds and parses relay envelopes for one local identity
pub trait EnvelopeCodec: Send + Sync {
    /// Identity this codec encodes as sender
    fn local_id(&self) -> &str;

    fn encode_registration(&self) -> Result<Bytes>;

    fn encode_signal(&self, peer_id: &str, signal: &PeerSignal) -> Result<Bytes>;

    fn encode_peer_payload(&self, peer_id: &str, payload: &[u8]) -> Result<Bytes>;

    fn decode(&self, data: Bytes) -> Result<InboundEnvelope>;
}

/// Codec for the relay's binary frame layout
#[derive(Debug, Clone)]
pub struct BinaryEnvelopeCodec {
    local_id: String,
    room: String,
}

impl BinaryEnvelopeCodec {
    pub fn new(local_id: impl Into<String>, room: impl Into<String>) -> Result<Self> {
        let local_id = local_id.into();
        let room = room.into();
        validate_identifier(&local_id)?;
        validate_identifier(&room)?;
        Ok(Self { local_id, room })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    fn addressed_to_us(&self, frame: &Frame) -> Result<()> {
        if frame.target != self.local_id {
            return Err(ProtocolError::Unexpected(format!(
                "{:?} frame addressed to '{}', not '{}'",
                frame.kind, frame.target, self.local_id
            )));
        }
        Ok(())
    }
}

impl EnvelopeCodec for BinaryEnvelopeCodec {
    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn encode_registration(&self) -> Result<Bytes> {
        Frame::new(
            FrameKind::Register,
            self.local_id.as_str(),
            self.room.as_str(),
            Bytes::new(),
        )
        .encode()
    }

    fn encode_signal(&self, peer_id: &str, signal: &PeerSignal) -> Result<Bytes> {
        validate_identifier(peer_id)?;
        Frame::new(
            signal.kind(),
            self.local_id.as_str(),
            peer_id,
            signal.to_json()?,
        )
        .encode()
    }

    fn encode_peer_payload(&self, peer_id: &str, payload: &[u8]) -> Result<Bytes> {
        validate_identifier(peer_id)?;
        Frame::new(
            FrameKind::Payload,
            self.local_id.as_str(),
            peer_id,
            Bytes::copy_from_slice(payload),
        )
        .encode()
    }

    fn decode(&self, data: Bytes) -> Result<InboundEnvelope> {
        let frame = Frame::decode(data)?;

        match frame.kind {
            FrameKind::RegisterAck => {
                self.addressed_to_us(&frame)?;
                Ok(InboundEnvelope::RegistrationAck)
            }
            FrameKind::Register => {
                // The relay forwards a newcomer's registration to the room
                validate_identifier(&frame.sender)?;
                if frame.sender == self.local_id {
                    return Err(ProtocolError::Unexpected(
                        "own registration echoed back".to_string(),
                    ));
                }
                Ok(InboundEnvelope::PeerAnnounced {
                    peer_id: frame.sender,
                })
            }
            kind if kind.is_signal() => {
                self.addressed_to_us(&frame)?;
                validate_identifier(&frame.sender)?;
                let signal = PeerSignal::from_frame(kind, &frame.payload)?;
                Ok(InboundEnvelope::Signal {
                    from: frame.sender,
                    signal,
                })
            }
            _ => {
                self.addressed_to_us(&frame)?;
                validate_identifier(&frame.sender)?;
                Ok(InboundEnvelope::RelayedPayload {
                    from: frame.sender,
                    payload: frame.payload,
                })
            }
        }
    }
}
