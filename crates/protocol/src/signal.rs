//! Negotiation values carried inside signal frames
//!
//! Field names follow the browser `RTCSessionDescriptionInit` and
//! `RTCIceCandidateInit` JSON so the payloads interoperate with web peers.

use crate::{FrameKind, ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Which side of the exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// A negotiation message addressed to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl PeerSignal {
    /// Frame kind that carries this signal
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Offer(_) => FrameKind::Offer,
            Self::Answer(_) => FrameKind::Answer,
            Self::Candidate(_) => FrameKind::Candidate,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        let json = match self {
            Self::Offer(desc) | Self::Answer(desc) => serde_json::to_vec(desc)?,
            Self::Candidate(candidate) => serde_json::to_vec(candidate)?,
        };
        Ok(json)
    }

    /// Parse the JSON payload of a signal frame
    ///
    /// The description type inside the JSON must agree with the frame kind.
    pub fn from_frame(kind: FrameKind, payload: &[u8]) -> Result<Self> {
        match kind {
            FrameKind::Offer | FrameKind::Answer => {
                let desc: SessionDescription = serde_json::from_slice(payload)?;
                match (kind, desc.sdp_type) {
                    (FrameKind::Offer, SdpType::Offer) => Ok(Self::Offer(desc)),
                    (FrameKind::Answer, SdpType::Answer) => Ok(Self::Answer(desc)),
                    (kind, sdp_type) => Err(ProtocolError::Unexpected(format!(
                        "{:?} frame carries {:?} description",
                        kind, sdp_type
                    ))),
                }
            }
            FrameKind::Candidate => Ok(Self::Candidate(serde_json::from_slice(payload)?)),
            other => Err(ProtocolError::Unexpected(format!(
                "{:?} frame is not a signal",
                other
            ))),
        }
    }
}
