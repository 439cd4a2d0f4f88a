//! Outbound route selection
//!
//! Every send re-reads the peer's record: a Connected record with an Open
//! channel gets the bytes directly, anything else goes through the relay.

use crate::peer::PeerRegistry;
use crate::signaling::Signaler;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Path a payload took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Peer-to-peer data channel
    Direct,
    /// Forwarded by the rendezvous relay
    Relay,
}

/// Picks direct or relay delivery per send
///
/// Never buffers, retries or blocks waiting for a route.
pub struct MessageRouter {
    registry: Arc<PeerRegistry>,
    signaler: Signaler,
}

impl MessageRouter {
    pub fn new(registry: Arc<PeerRegistry>, signaler: Signaler) -> Self {
        Self { registry, signaler }
    }

    pub async fn send(&self, peer_id: &str, payload: &[u8]) -> Result<Route> {
        if let Some(conn) = self.registry.get(peer_id).await {
            if let Some(channel) = conn.direct_channel().await {
                channel
                    .send(Bytes::copy_from_slice(payload))
                    .await
                    .map_err(|e| match e {
                        Error::DataChannel(_) => e,
                        other => Error::DataChannel(other.to_string()),
                    })
                    .inspect_err(|e| warn!("Direct send to {} failed: {}", peer_id, e))?;
                debug!("Sent {} bytes to {} directly", payload.len(), peer_id);
                return Ok(Route::Direct);
            }
        }

        self.signaler.send_payload(peer_id, payload)?;
        debug!("Sent {} bytes to {} via relay", payload.len(), peer_id);
        Ok(Route::Relay)
    }
}
