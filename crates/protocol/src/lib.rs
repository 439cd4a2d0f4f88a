//! Wire protocol shared by PeerLink nodes and the rendezvous relay
//!
//! Every message exchanged with the relay is a single binary WebSocket frame:
//!
//! ```text
//! [kind: u8][sender_len: u8][sender][target_len: u8][target][payload...]
//! ```
//!
//! Signaling payloads (descriptions and candidates) travel as JSON text inside
//! the payload section. Relayed application payloads are carried as-is.
//!
//! # Example
//!
//! ```
//! use peerlink_protocol::{BinaryEnvelopeCodec, EnvelopeCodec, InboundEnvelope};
//!
//! let alice = BinaryEnvelopeCodec::new("alice", "lobby").unwrap();
//! let bob = BinaryEnvelopeCodec::new("bob", "lobby").unwrap();
//!
//! let wire = alice.encode_peer_payload("bob", b"hello").unwrap();
//! match bob.decode(wire).unwrap() {
//!     InboundEnvelope::RelayedPayload { from, payload } => {
//!         assert_eq!(from, "alice");
//!         assert_eq!(&payload[..], b"hello");
//!     }
//!     other => panic!("unexpected envelope: {:?}", other),
//! }
//! ```

#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod signal;

pub use codec::{BinaryEnvelopeCodec, EnvelopeCodec, InboundEnvelope};
pub use error::{ProtocolError, Result};
pub use frame::{validate_identifier, Frame, FrameKind, MAX_FRAME_SIZE, MAX_ID_LEN};
pub use signal::{IceCandidate, PeerSignal, SdpType, SessionDescription};
