//! Error types for the relay wire protocol

/// Result type alias using [`ProtocolError`]
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while building or parsing relay frames
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame shorter than the fixed header
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    /// A length prefix points past the end of the frame
    #[error("Truncated frame: {0}")]
    Truncated(&'static str),

    /// Unknown frame kind byte
    #[error("Unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    /// Identifier bytes are not valid UTF-8
    #[error("Identifier is not valid UTF-8")]
    InvalidUtf8,

    /// Identifier is empty or longer than a length byte can express
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Frame exceeds the relay limit
    #[error("Frame size {size} exceeds maximum {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Well-formed frame that makes no sense in context
    #[error("Unexpected frame: {0}")]
    Unexpected(String),

    /// Signal payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
