//! Relay frame layout
//!
//! A frame is a kind byte followed by two length-prefixed identifiers and an
//! unframed payload that runs to the end of the message. The relay only looks
//! at `target` to route, everything after the header is opaque to it.

use crate::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Longest identifier a single length byte can describe
pub const MAX_ID_LEN: usize = u8::MAX as usize;

/// Largest frame the relay accepts (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Kind byte at the start of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Client → relay: `sender` is the client id, `target` the room
    Register = 0x01,
    /// Relay → client: registration accepted, `target` is the client id
    RegisterAck = 0x02,
    /// SDP offer (JSON payload)
    Offer = 0x10,
    /// SDP answer (JSON payload)
    Answer = 0x11,
    /// Trickled ICE candidate (JSON payload)
    Candidate = 0x12,
    /// Opaque application payload forwarded by the relay
    Payload = 0x20,
}

impl FrameKind {
    /// Parse a kind byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Register),
            0x02 => Ok(Self::RegisterAck),
            0x10 => Ok(Self::Offer),
            0x11 => Ok(Self::Answer),
            0x12 => Ok(Self::Candidate),
            0x20 => Ok(Self::Payload),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Offer, answer and candidate frames carry negotiation data
    pub fn is_signal(self) -> bool {
        matches!(self, Self::Offer | Self::Answer | Self::Candidate)
    }
}

/// Check that a peer or room identifier fits the wire format
pub fn validate_identifier(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ProtocolError::InvalidIdentifier(
            "identifier must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ProtocolError::InvalidIdentifier(format!(
            "identifier is {} bytes, maximum is {}",
            id.len(),
            MAX_ID_LEN
        )));
    }
    Ok(())
}

/// One relay frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub sender: String,
    pub target: String,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(
        kind: FrameKind,
        sender: impl Into<String>,
        target: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            sender: sender.into(),
            target: target.into(),
            payload: payload.into(),
        }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Bytes> {
        for id in [&self.sender, &self.target] {
            if id.len() > MAX_ID_LEN {
                return Err(ProtocolError::InvalidIdentifier(format!(
                    "identifier is {} bytes, maximum is {}",
                    id.len(),
                    MAX_ID_LEN
                )));
            }
        }

        let size = 3 + self.sender.len() + self.target.len() + self.payload.len();
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(self.kind.as_byte());
        buf.put_u8(self.sender.len() as u8);
        buf.put_slice(self.sender.as_bytes());
        buf.put_u8(self.target.len() as u8);
        buf.put_slice(self.target.as_bytes());
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Parse wire bytes; the payload is a zero-copy slice of `data`
    pub fn decode(data: Bytes) -> Result<Self> {
        if data.len() < 3 {
            return Err(ProtocolError::TooShort(data.len()));
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let kind = FrameKind::from_byte(data[0])?;

        let sender_len = data[1] as usize;
        let mut pos = 2;
        let sender = read_id(&data, pos, sender_len, "sender")?;
        pos += sender_len;

        let target_len = *data
            .get(pos)
            .ok_or(ProtocolError::Truncated("missing target length"))? as usize;
        pos += 1;
        let target = read_id(&data, pos, target_len, "target")?;
        pos += target_len;

        Ok(Self {
            kind,
            sender,
            target,
            payload: data.slice(pos..),
        })
    }
}

fn read_id(data: &[u8], start: usize, len: usize, what: &'static str) -> Result<String> {
    let raw = data
        .get(start..start + len)
        .ok_or(ProtocolError::Truncated(what))?;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8)
}
