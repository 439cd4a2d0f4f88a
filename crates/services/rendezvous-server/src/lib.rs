//! Rendezvous relay for PeerLink nodes
//!
//! Nodes connect over WebSocket and send a `Register` frame naming
//! themselves and a room. The relay acknowledges, announces the newcomer to
//! everyone already in the room, and from then on forwards each frame to the
//! client named in its target field.
//!
//! ```no_run
//! # async fn example() -> peerlink_rendezvous::Result<()> {
//! let server = peerlink_rendezvous::RendezvousServer::start("127.0.0.1:8765").await?;
//! println!("relay at {}", server.url());
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

mod directory;
pub mod error;
mod server;

pub use error::{Error, Result};
pub use server::{RendezvousServer, ServerHandle};
