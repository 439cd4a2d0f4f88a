//! Per-peer connection records and the RTC backend they drive

mod connection;
mod registry;
pub mod rtc;

pub use connection::{PeerConnection, PeerContext, PeerNotice};
pub use registry::PeerRegistry;

/// Peer connection state
///
/// Moves forward only: `New → Connecting → Connected → {Disconnected,
/// Failed, Closed}`, with `Disconnected → {Failed, Closed}` also allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Record created, nothing negotiated yet
    New,
    /// Offer/answer exchange in progress
    Connecting,
    /// Underlying connection established
    Connected,
    /// Connectivity lost, may still fail or close
    Disconnected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            ConnectionState::New => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnected => 3,
            ConnectionState::Failed | ConnectionState::Closed => 4,
        }
    }

    /// Failed and Closed are final
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    /// Whether moving to `next` is a forward step
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// Direct data channel state, independent of the connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No channel created or announced yet
    Absent,
    /// Channel exists, not open yet
    Connecting,
    /// Channel open, direct sends possible
    Open,
    /// Channel closed
    Closed,
}

/// Which side of the negotiation this record is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// We sent the offer
    Offerer,
    /// We answered an inbound offer
    Answerer,
}

/// Point-in-time view of a peer record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub connection_id: String,
    pub role: Role,
    pub connection_state: ConnectionState,
    pub channel_state: ChannelState,
    /// Remote candidates waiting for the remote description
    pub pending_candidates: usize,
}

impl PeerSnapshot {
    /// Direct delivery is possible
    pub fn is_direct(&self) -> bool {
        self.connection_state == ConnectionState::Connected
            && self.channel_state == ChannelState::Open
    }
}
