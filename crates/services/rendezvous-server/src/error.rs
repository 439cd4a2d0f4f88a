//! Error types for the rendezvous relay

use thiserror::Error;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the relay
#[derive(Debug, Error)]
pub enum Error {
    /// Listener or socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or stream failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Client sent something that is not a valid relay frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] peerlink_protocol::ProtocolError),

    /// First frame of a connection was not a registration
    #[error("Registration required: {0}")]
    RegistrationRequired(String),
}
