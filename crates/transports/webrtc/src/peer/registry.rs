//! Peer record registry

use super::{PeerConnection, PeerSnapshot};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Map from peer id to its current record
///
/// Inserts happen under a single write lock, so check-and-insert and
/// replace are atomic with respect to other peers' inserts.
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Arc<PeerConnection>>>,

    /// Upper bound on non-terminal records
    max_peers: usize,
}

impl PeerRegistry {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_peers,
        }
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerConnection>> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Whether `connection_id` is still the live record for `peer_id`
    pub async fn is_current(&self, peer_id: &str, connection_id: &str) -> bool {
        self.peers
            .read()
            .await
            .get(peer_id)
            .map(|conn| conn.connection_id() == connection_id)
            .unwrap_or(false)
    }

    /// Insert unless an active record exists; a terminal one is replaced
    pub async fn insert_if_idle(
        &self,
        conn: Arc<PeerConnection>,
    ) -> Result<Option<Arc<PeerConnection>>> {
        let mut peers = self.peers.write().await;

        if let Some(existing) = peers.get(conn.peer_id()) {
            if !existing.state().await.is_terminal() {
                return Err(Error::PeerConnection(
                    "negotiation already in progress".to_string(),
                ));
            }
        }

        Self::check_capacity(&peers, conn.peer_id(), self.max_peers).await?;
        Ok(Self::put(&mut peers, conn))
    }

    /// Insert, discarding whatever record the peer had
    ///
    /// The caller closes the returned record.
    pub async fn replace(&self, conn: Arc<PeerConnection>) -> Result<Option<Arc<PeerConnection>>> {
        let mut peers = self.peers.write().await;
        Self::check_capacity(&peers, conn.peer_id(), self.max_peers).await?;
        Ok(Self::put(&mut peers, conn))
    }

    async fn check_capacity(
        peers: &HashMap<String, Arc<PeerConnection>>,
        peer_id: &str,
        max_peers: usize,
    ) -> Result<()> {
        let mut active = 0;
        for (id, conn) in peers.iter() {
            if id != peer_id && !conn.state().await.is_terminal() {
                active += 1;
            }
        }

        if active >= max_peers {
            return Err(Error::PeerConnection(format!(
                "max_peers reached ({})",
                max_peers
            )));
        }
        Ok(())
    }

    fn put(
        peers: &mut HashMap<String, Arc<PeerConnection>>,
        conn: Arc<PeerConnection>,
    ) -> Option<Arc<PeerConnection>> {
        let previous = peers.insert(conn.peer_id().to_string(), Arc::clone(&conn));
        match &previous {
            Some(old) => info!(
                "Replaced record for {}: {} -> {}",
                conn.peer_id(),
                old.connection_id(),
                conn.connection_id()
            ),
            None => debug!("Added record for {}", conn.peer_id()),
        }
        previous
    }

    pub async fn all(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn snapshots(&self) -> Vec<PeerSnapshot> {
        let mut snapshots = Vec::new();
        for conn in self.all().await {
            snapshots.push(conn.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::rtc::mock::MockConnector;
    use crate::peer::rtc::RtcConnector;
    use crate::peer::{PeerContext, Role};
    use crate::signaling::{Registration, Signaler, SignalingSink};
    use bytes::Bytes;
    use peerlink_protocol::BinaryEnvelopeCodec;

    struct NullSink;

    impl SignalingSink for NullSink {
        fn send(&self, _data: Bytes) -> Result<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    async fn make(connector: &MockConnector, peer_id: &str) -> Arc<PeerConnection> {
        let codec = Arc::new(BinaryEnvelopeCodec::new("alice", "lobby").unwrap());
        let signaler = Signaler::new(codec, Arc::new(NullSink), Arc::new(Registration::new()));
        let (session, _events) = connector.create(peer_id).await.unwrap();
        Arc::new(PeerConnection::new(
            peer_id,
            Role::Offerer,
            session,
            PeerContext {
                signaler,
                channel_label: "peerlink".to_string(),
            },
        ))
    }

    #[tokio::test]
    async fn test_is_current_tracks_generation() {
        let connector = MockConnector::new();
        let registry = PeerRegistry::new(4);

        let first = make(&connector, "bob").await;
        registry.replace(Arc::clone(&first)).await.unwrap();
        assert!(registry.is_current("bob", first.connection_id()).await);

        let second = make(&connector, "bob").await;
        let old = registry.replace(Arc::clone(&second)).await.unwrap().unwrap();
        assert_eq!(old.connection_id(), first.connection_id());
        assert!(!registry.is_current("bob", first.connection_id()).await);
        assert!(registry.is_current("bob", second.connection_id()).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_if_idle_refuses_active_record() {
        let connector = MockConnector::new();
        let registry = PeerRegistry::new(4);

        registry.insert_if_idle(make(&connector, "bob").await).await.unwrap();
        let err = registry
            .insert_if_idle(make(&connector, "bob").await)
            .await
            .err().unwrap();
        assert!(matches!(err, Error::PeerConnection(_)));
    }

    #[tokio::test]
    async fn test_insert_if_idle_replaces_terminal_record() {
        let connector = MockConnector::new();
        let registry = PeerRegistry::new(4);

        let first = make(&connector, "bob").await;
        registry.insert_if_idle(Arc::clone(&first)).await.unwrap();
        first.close().await.unwrap();

        let replaced = registry
            .insert_if_idle(make(&connector, "bob").await)
            .await
            .unwrap();
        assert!(replaced.is_some());
    }

    #[tokio::test]
    async fn test_capacity_counts_only_active_records() {
        let connector = MockConnector::new();
        let registry = PeerRegistry::new(1);

        let bob = make(&connector, "bob").await;
        registry.replace(Arc::clone(&bob)).await.unwrap();
        assert!(registry.replace(make(&connector, "carol").await).await.is_err());

        bob.close().await.unwrap();
        registry.replace(make(&connector, "carol").await).await.unwrap();
        assert_eq!(registry.len().await, 2);
    }
}
