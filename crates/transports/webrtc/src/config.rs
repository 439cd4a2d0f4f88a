//! Configuration types for the PeerLink node

use peerlink_protocol::validate_identifier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for PeerLinkTransport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerLinkConfig {
    /// Rendezvous relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// Room to register in; peers in the same room are announced to each other
    pub room: String,

    /// Local peer ID, supplied by the application
    pub peer_id: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum concurrently active peer connections (default: 16)
    pub max_peers: u32,

    /// Label of the data channel opened by the offering side
    pub data_channel_label: String,

    /// Data channel mode (default: Reliable)
    pub data_channel_mode: DataChannelMode,

    /// Directory mounted and synced before persisted state is loaded
    pub persist_dir: Option<PathBuf>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Data channel mode
///
/// Determines the reliability of message delivery on the direct channel.
/// Relay delivery is always reliable and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChannelMode {
    /// Reliable, ordered delivery (default)
    Reliable,
    /// Unreliable, unordered delivery (low latency)
    Unreliable,
}

impl DataChannelMode {
    /// Get the ordered setting for webrtc-rs
    pub fn ordered(&self) -> bool {
        match self {
            DataChannelMode::Reliable => true,
            DataChannelMode::Unreliable => false,
        }
    }

    /// Get the max retransmits setting for webrtc-rs
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            DataChannelMode::Reliable => None,      // Unlimited retransmits
            DataChannelMode::Unreliable => Some(0), // No retransmits
        }
    }
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8765".to_string(),
            room: "default".to_string(),
            peer_id: String::new(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            max_peers: 16,
            data_channel_label: "peerlink".to_string(),
            data_channel_mode: DataChannelMode::Reliable,
            persist_dir: None,
        }
    }
}

impl PeerLinkConfig {
    /// Create a configuration for `peer_id` in `room` on the given relay
    pub fn new(
        signaling_url: impl Into<String>,
        room: impl Into<String>,
        peer_id: impl Into<String>,
    ) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            room: room.into(),
            peer_id: peer_id.into(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `peer_id` or `room` is empty or longer than 255 bytes
    /// - `stun_servers` is empty
    /// - `max_peers` is 0
    /// - `data_channel_label` is empty
    /// - `signaling_url` is not a valid WebSocket URL
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        validate_identifier(&self.peer_id)
            .map_err(|e| Error::InvalidConfig(format!("peer_id: {}", e)))?;
        validate_identifier(&self.room)
            .map_err(|e| Error::InvalidConfig(format!("room: {}", e)))?;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.max_peers == 0 {
            return Err(Error::InvalidConfig(
                "max_peers must be at least 1".to_string(),
            ));
        }

        if self.data_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        Ok(())
    }

    /// Builder: set STUN servers
    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    /// Builder: set TURN servers
    pub fn with_turn_servers(mut self, servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = servers;
        self
    }

    /// Builder: set max peers
    pub fn with_max_peers(mut self, max_peers: u32) -> Self {
        self.max_peers = max_peers;
        self
    }

    /// Builder: set data channel label and mode
    pub fn with_data_channel(mut self, label: impl Into<String>, mode: DataChannelMode) -> Self {
        self.data_channel_label = label.into();
        self.data_channel_mode = mode;
        self
    }

    /// Builder: set the persistence directory
    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }
}
