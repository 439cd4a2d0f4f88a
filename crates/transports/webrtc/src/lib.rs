//! Peer-to-peer connection orchestration over WebRTC data channels
//!
//! This crate lets a node register with a rendezvous relay, negotiate direct
//! WebRTC data-channel connections with other peers through that relay, and
//! deliver opaque payloads over whichever route is currently usable.
//!
//! # Features
//!
//! - **Relay-first delivery**: payloads flow through the relay until a direct
//!   channel is Connected and Open, then switch over without caller changes
//! - **Per-peer state machines**: offer/answer, early candidate queueing,
//!   discard-and-recreate on re-offer
//! - **Binary relay protocol**: frames shared with the rendezvous server via
//!   `peerlink-protocol`
//! - **Pluggable backends**: webrtc-rs in production, an in-memory backend
//!   behind the `test-util` feature
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Application (PeerHooks)                               │
//! │  ↑ payloads, reachability, announcements               │
//! │  PeerLinkTransport                                     │
//! │  ├─ SignalingClient (binary frames over WebSocket)     │
//! │  ├─ Orchestrator                                       │
//! │  │   ├─ PeerRegistry (one PeerConnection per peer)     │
//! │  │   │   └─ RtcSession + DataChannel (webrtc-rs)       │
//! │  │   └─ MessageRouter (direct ↔ relay)                 │
//! │  └─ StorageGate (optional persist_dir)                 │
//! │     ↓                                                   │
//! │  rendezvous relay                                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use peerlink_webrtc::PeerLinkConfig;
//!
//! let config = PeerLinkConfig::new("ws://localhost:8765", "lobby", "alice")
//!     .with_max_peers(8);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_peers, 8);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use peerlink_webrtc::{ChannelHooks, PeerLinkConfig, PeerLinkTransport};
//! use std::sync::Arc;
//!
//! # async fn example() -> peerlink_webrtc::Result<()> {
//! let config = PeerLinkConfig::new("ws://localhost:8765", "lobby", "alice");
//! let (hooks, _events) = ChannelHooks::new();
//! let transport = PeerLinkTransport::new(config, Arc::new(hooks))?;
//!
//! transport.start().await?;
//! transport.wait_registered().await?;
//!
//! // Relayed now, direct once the connection is up
//! transport.initiate("bob").await?;
//! transport.send("bob", b"hello").await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

// Public modules
pub mod config;
pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod peer;
pub mod router;
pub mod signaling;
pub mod storage;

mod transport;

// Re-exports for public API
pub use config::{DataChannelMode, PeerLinkConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use hooks::{ChannelHooks, HookEvent, PeerHooks};
pub use orchestrator::Orchestrator;
pub use peer::{ChannelState, ConnectionState, PeerSnapshot, Role};
pub use router::Route;
pub use signaling::RegistrationState;
pub use transport::PeerLinkTransport;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
