//! Error types for peer orchestration

use peerlink_protocol::ProtocolError;

/// Result type alias using PeerLink Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating peer connections
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signaling transport is not open, nothing was sent
    #[error("Signaling transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Malformed or unexpected signaling envelope
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A second answer arrived for a connection that already applied one
    #[error("Duplicate answer from peer: {0}")]
    DuplicateAnswer(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Relay has not acknowledged our registration yet
    #[error("Not registered with the rendezvous relay")]
    NotRegistered,

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// Peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage mount or sync failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportUnavailable(_)
                | Error::NotRegistered
                | Error::DataChannel(_)
                | Error::WebSocket(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound(_)
                | Error::DuplicateAnswer(_)
                | Error::PeerConnection(_)
                | Error::IceCandidate(_)
                | Error::Sdp(_)
        )
    }
}
