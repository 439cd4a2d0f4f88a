//! PeerLink node facade
//!
//! Ties the signaling client, the orchestrator and the optional storage gate
//! into one object with an application-facing API.

use crate::config::PeerLinkConfig;
use crate::hooks::PeerHooks;
use crate::orchestrator::Orchestrator;
use crate::peer::rtc::{RtcConnector, WebRtcConnector};
use crate::peer::PeerSnapshot;
use crate::router::Route;
use crate::signaling::{Registration, RegistrationState, SignalingClient, SignalingSink};
use crate::storage::{DirectoryStorage, StorageGate};
use crate::{Error, Result};
use parking_lot::Mutex;
use peerlink_protocol::{BinaryEnvelopeCodec, EnvelopeCodec};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A PeerLink node: one registration in one room, many peer connections
pub struct PeerLinkTransport {
    /// Transport configuration
    config: PeerLinkConfig,

    codec: Arc<BinaryEnvelopeCodec>,

    /// Connection to the rendezvous relay
    client: Arc<SignalingClient>,

    orchestrator: Arc<Orchestrator>,

    hooks: Arc<dyn PeerHooks>,

    /// Present when `persist_dir` is configured
    storage: Option<StorageGate>,

    /// Task feeding signaling events into the orchestrator
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PeerLinkTransport {
    /// Create a node backed by webrtc-rs
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn new(config: PeerLinkConfig, hooks: Arc<dyn PeerHooks>) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(WebRtcConnector::new(&config));
        Self::with_connector(config, connector, hooks)
    }

    /// Create a node with a caller-supplied RTC backend
    pub fn with_connector(
        config: PeerLinkConfig,
        connector: Arc<dyn RtcConnector>,
        hooks: Arc<dyn PeerHooks>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            "Creating PeerLink node {} in room {}",
            config.peer_id, config.room
        );

        let codec = Arc::new(BinaryEnvelopeCodec::new(&config.peer_id, &config.room)?);
        let registration = Arc::new(Registration::new());
        let client = Arc::new(SignalingClient::new(
            config.signaling_url.clone(),
            Arc::clone(&registration),
        ));

        let orchestrator = Orchestrator::new(
            &config,
            Arc::clone(&codec) as Arc<dyn EnvelopeCodec>,
            Arc::clone(&client) as Arc<dyn SignalingSink>,
            registration,
            connector,
            Arc::clone(&hooks),
        );

        let storage = config
            .persist_dir
            .as_ref()
            .map(|dir| StorageGate::new(Arc::new(DirectoryStorage::new(dir))));

        Ok(Self {
            config,
            codec,
            client,
            orchestrator,
            hooks,
            storage,
            pump: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PeerLinkConfig {
        &self.config
    }

    pub fn local_peer_id(&self) -> &str {
        &self.config.peer_id
    }

    /// Start the node
    ///
    /// Mounts storage if configured, connects to the relay and sends the
    /// registration. Registration completes when the relay acknowledges it;
    /// see [`wait_registered`](Self::wait_registered).
    pub async fn start(&self) -> Result<()> {
        info!("Starting PeerLink node");

        if let Some(gate) = &self.storage {
            gate.sync_then(self.hooks.as_ref()).await?;
        }

        let registration = self.codec.encode_registration()?;
        let mut events = self.client.open(registration).await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                orchestrator.handle_signaling_event(event).await;
            }
            debug!("Signaling event pump stopped");
        });

        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }

        info!("PeerLink node started");
        Ok(())
    }

    /// Resolve once the relay has acknowledged our registration
    pub async fn wait_registered(&self) -> Result<()> {
        self.orchestrator.registration().wait_registered().await
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.orchestrator.registration().state()
    }

    /// Whether the storage gate has completed (always false without `persist_dir`)
    pub fn storage_ready(&self) -> bool {
        self.storage.as_ref().map(StorageGate::is_synced).unwrap_or(false)
    }

    /// Begin negotiating a direct connection to `peer_id`
    pub async fn initiate(&self, peer_id: &str) -> Result<()> {
        if !self.orchestrator.registration().is_registered() {
            return Err(Error::NotRegistered);
        }
        self.orchestrator.initiate(peer_id).await
    }

    /// Send `payload` to `peer_id` and report which route carried it
    pub async fn send(&self, peer_id: &str, payload: &[u8]) -> Result<Route> {
        self.orchestrator.send(peer_id, payload).await
    }

    pub async fn peer(&self, peer_id: &str) -> Option<PeerSnapshot> {
        self.orchestrator.peer(peer_id).await
    }

    pub async fn list_peers(&self) -> Vec<PeerSnapshot> {
        self.orchestrator.list_peers().await
    }

    pub async fn disconnect_peer(&self, peer_id: &str) -> Result<()> {
        info!("Disconnecting from peer: {}", peer_id);
        self.orchestrator.disconnect_peer(peer_id).await
    }

    /// Shutdown the node
    ///
    /// Closes every peer connection and the relay connection.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down PeerLink node");

        self.orchestrator.shutdown().await;
        self.client.close();

        let pump = self.pump.lock().take();
        if let Some(mut handle) = pump {
            // Let the pump deliver the close event, then stop it
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                warn!("Signaling event pump did not stop in time");
                handle.abort();
            }
        }

        info!("PeerLink node shutdown complete");
        Ok(())
    }
}
