//! Signaling dispatch and per-peer lifecycle
//!
//! The orchestrator owns the registry and wires the pieces together:
//!
//! ```text
//!  relay ──► SignalingEvent ──► decode ──┬─ RegistrationAck ─► Registered
//!                                        ├─ PeerAnnounced ───► on_peer_announced
//!                                        ├─ RelayedPayload ──► on_payload
//!                                        └─ Signal ──► per-peer worker ──► PeerConnection
//!
//!  backend ──► RtcEvent ──► per-record pump ──► PeerConnection ──► hooks
//! ```
//!
//! Signals for one peer are handled strictly in arrival order by that peer's
//! worker, while different peers proceed independently. Every pump and worker
//! checks that its record is still current before touching the outside world.

use crate::config::PeerLinkConfig;
use crate::hooks::PeerHooks;
use crate::peer::rtc::{RtcConnector, RtcEvent};
use crate::peer::{PeerConnection, PeerContext, PeerNotice, PeerRegistry, PeerSnapshot, Role};
use crate::router::{MessageRouter, Route};
use crate::signaling::{Registration, RegistrationState, Signaler, SignalingEvent, SignalingSink};
use crate::{Error, Result};
use bytes::Bytes;
use peerlink_protocol::{validate_identifier, EnvelopeCodec, InboundEnvelope, PeerSignal};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Queue of one serial signal worker
struct SignalWorker {
    id: u64,
    tx: mpsc::UnboundedSender<PeerSignal>,
}

/// Root of the peer orchestration layer
pub struct Orchestrator {
    codec: Arc<dyn EnvelopeCodec>,
    connector: Arc<dyn RtcConnector>,
    registry: Arc<PeerRegistry>,
    registration: Arc<Registration>,
    hooks: Arc<dyn PeerHooks>,
    router: MessageRouter,
    context: PeerContext,

    /// Inbound signal queues, one serial worker per remote peer
    ///
    /// A worker retires once its queue is empty and its peer has no active
    /// record; sends happen under this lock, so retiring under it loses nothing.
    workers: Mutex<HashMap<String, SignalWorker>>,
    next_worker: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        config: &PeerLinkConfig,
        codec: Arc<dyn EnvelopeCodec>,
        sink: Arc<dyn SignalingSink>,
        registration: Arc<Registration>,
        connector: Arc<dyn RtcConnector>,
        hooks: Arc<dyn PeerHooks>,
    ) -> Arc<Self> {
        let registry = Arc::new(PeerRegistry::new(config.max_peers as usize));
        let signaler = Signaler::new(Arc::clone(&codec), sink, Arc::clone(&registration));

        Arc::new(Self {
            codec,
            connector,
            registry: Arc::clone(&registry),
            registration,
            hooks,
            router: MessageRouter::new(registry, signaler.clone()),
            context: PeerContext {
                signaler,
                channel_label: config.data_channel_label.clone(),
            },
            workers: Mutex::new(HashMap::new()),
            next_worker: AtomicU64::new(1),
        })
    }

    pub fn local_id(&self) -> &str {
        self.codec.local_id()
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    /// Handle one event from the signaling transport
    pub async fn handle_signaling_event(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::Message(data) => {
                // Already logged; malformed input never reaches a record
                let _ = self.handle_inbound(data).await;
            }
            SignalingEvent::Closed { reason } => {
                warn!("Signaling transport closed: {}", reason);
                self.registration.set(RegistrationState::Unregistered);
                self.hooks.on_signaling_closed(&reason).await;
            }
        }
    }

    /// Decode and dispatch one inbound envelope
    ///
    /// Peer signals are queued on the sender's worker and processed
    /// asynchronously; malformed envelopes are logged and dropped.
    pub async fn handle_inbound(self: &Arc<Self>, data: Bytes) -> Result<()> {
        let envelope = match self.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed signaling message: {}", e);
                return Err(e.into());
            }
        };

        match envelope {
            InboundEnvelope::RegistrationAck => {
                info!("Registered with rendezvous relay as {}", self.local_id());
                self.registration.set(RegistrationState::Registered);
            }
            InboundEnvelope::PeerAnnounced { peer_id } => {
                debug!("Peer announced: {}", peer_id);
                self.hooks.on_peer_announced(&peer_id).await;
            }
            InboundEnvelope::RelayedPayload { from, payload } => {
                self.hooks.on_payload(&from, payload).await;
            }
            InboundEnvelope::Signal { from, signal } => {
                self.dispatch_signal(from, signal).await;
            }
        }
        Ok(())
    }

    async fn dispatch_signal(self: &Arc<Self>, peer_id: String, signal: PeerSignal) {
        let mut workers = self.workers.lock().await;

        let signal = match workers.get(&peer_id) {
            Some(worker) => match worker.tx.send(signal) {
                Ok(()) => return,
                // Worker gone; start a fresh one below
                Err(mpsc::error::SendError(returned)) => returned,
            },
            None => signal,
        };

        let worker = self.spawn_worker(peer_id.clone());
        let _ = worker.tx.send(signal);
        workers.insert(peer_id, worker);
    }

    fn spawn_worker(self: &Arc<Self>, peer_id: String) -> SignalWorker {
        let (tx, mut rx) = mpsc::unbounded_channel::<PeerSignal>();
        let id = self.next_worker.fetch_add(1, Ordering::SeqCst);
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut next = rx.recv().await;
            while let Some(signal) = next.take() {
                let Some(orchestrator) = weak.upgrade() else { break };
                if let Err(e) = orchestrator.process_signal(&peer_id, signal).await {
                    warn!("Signal from {} dropped: {}", peer_id, e);
                }

                next = if orchestrator.has_active_record(&peer_id).await {
                    // Parked workers must not keep the orchestrator alive
                    drop(orchestrator);
                    rx.recv().await
                } else {
                    orchestrator.retire_worker(&peer_id, id, &mut rx).await
                };
            }
            debug!("Signal worker {} for {} stopped", id, peer_id);
        });

        SignalWorker { id, tx }
    }

    /// Remove an idle worker's entry unless a signal is already queued
    ///
    /// Returns the queued signal, or `None` once the worker is unregistered.
    async fn retire_worker(
        &self,
        peer_id: &str,
        id: u64,
        rx: &mut mpsc::UnboundedReceiver<PeerSignal>,
    ) -> Option<PeerSignal> {
        let mut workers = self.workers.lock().await;
        if let Ok(signal) = rx.try_recv() {
            return Some(signal);
        }
        if workers.get(peer_id).is_some_and(|w| w.id == id) {
            workers.remove(peer_id);
            debug!("Retired idle signal worker for {}", peer_id);
        }
        None
    }

    async fn has_active_record(&self, peer_id: &str) -> bool {
        match self.registry.get(peer_id).await {
            Some(conn) => !conn.state().await.is_terminal(),
            None => false,
        }
    }

    /// Number of live signal workers
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Apply one signal to the addressed record
    #[instrument(skip(self, signal), fields(kind = ?signal.kind()))]
    async fn process_signal(self: &Arc<Self>, peer_id: &str, signal: PeerSignal) -> Result<()> {
        match signal {
            PeerSignal::Offer(offer) => self.handle_offer(peer_id, offer).await,
            PeerSignal::Answer(answer) => {
                let conn = self.record(peer_id).await?;
                conn.accept_answer(answer).await
            }
            PeerSignal::Candidate(candidate) => {
                let conn = self.record(peer_id).await?;
                conn.add_remote_candidate(candidate).await
            }
        }
    }

    async fn record(&self, peer_id: &str) -> Result<Arc<PeerConnection>> {
        self.registry
            .get(peer_id)
            .await
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))
    }

    /// Inbound offer: always a fresh answering record
    async fn handle_offer(
        self: &Arc<Self>,
        peer_id: &str,
        offer: peerlink_protocol::SessionDescription,
    ) -> Result<()> {
        let conn = self.create_record(peer_id, Role::Answerer).await?;

        let replaced = match self.registry.replace(Arc::clone(&conn)).await {
            Ok(replaced) => replaced,
            Err(e) => {
                let _ = conn.close().await;
                return Err(e);
            }
        };
        if let Some(old) = replaced {
            info!(
                "Re-offer from {}, discarding connection {}",
                peer_id,
                old.connection_id()
            );
            if let Err(e) = old.close().await {
                debug!("Closing discarded record for {} failed: {}", peer_id, e);
            }
        }

        if let Err(e) = conn.accept_offer(offer).await {
            error!("Failed to answer offer from {}: {}", peer_id, e);
            let _ = conn.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Create a record and start pumping its backend events
    async fn create_record(&self, peer_id: &str, role: Role) -> Result<Arc<PeerConnection>> {
        let (session, events) = self.connector.create(peer_id).await?;
        let conn = Arc::new(PeerConnection::new(
            peer_id,
            role,
            session,
            self.context.clone(),
        ));
        self.spawn_event_pump(&conn, events);
        Ok(conn)
    }

    fn spawn_event_pump(
        &self,
        conn: &Arc<PeerConnection>,
        mut events: mpsc::UnboundedReceiver<RtcEvent>,
    ) {
        let record = Arc::downgrade(conn);
        let peer_id = conn.peer_id().to_string();
        let connection_id = conn.connection_id().to_string();
        let registry = Arc::clone(&self.registry);
        let hooks = Arc::clone(&self.hooks);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(conn) = record.upgrade() else { break };

                if !registry.is_current(&peer_id, &connection_id).await {
                    debug!(
                        "Dropping {:?} from discarded connection {} of {}",
                        event, connection_id, peer_id
                    );
                    continue;
                }

                match conn.apply_event(event).await {
                    Some(PeerNotice::Reachable) => hooks.on_peer_reachable(&peer_id).await,
                    Some(PeerNotice::Payload(data)) => hooks.on_payload(&peer_id, data).await,
                    None => {}
                }
            }
            debug!("Event pump for {} ({}) stopped", peer_id, connection_id);
        });
    }

    /// Start an outbound negotiation with `peer_id`
    ///
    /// Fails if a negotiation with that peer is already active; a closed or
    /// failed record is replaced.
    #[instrument(skip(self))]
    pub async fn initiate(self: &Arc<Self>, peer_id: &str) -> Result<()> {
        validate_identifier(peer_id)?;
        if peer_id == self.local_id() {
            return Err(Error::PeerConnection("cannot connect to self".to_string()));
        }

        let conn = self.create_record(peer_id, Role::Offerer).await?;
        if let Err(e) = self.registry.insert_if_idle(Arc::clone(&conn)).await {
            let _ = conn.close().await;
            return Err(e);
        }

        if let Err(e) = conn.initiate().await {
            error!("Failed to initiate connection to {}: {}", peer_id, e);
            let _ = conn.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Send a payload, directly if possible, otherwise through the relay
    pub async fn send(&self, peer_id: &str, payload: &[u8]) -> Result<Route> {
        self.router.send(peer_id, payload).await
    }

    pub async fn peer(&self, peer_id: &str) -> Option<PeerSnapshot> {
        match self.registry.get(peer_id).await {
            Some(conn) => Some(conn.snapshot().await),
            None => None,
        }
    }

    pub async fn list_peers(&self) -> Vec<PeerSnapshot> {
        self.registry.snapshots().await
    }

    /// Close the record for `peer_id`; it stays queryable as Closed
    ///
    /// The peer's signal worker is dropped too; a later signal starts a new one.
    pub async fn disconnect_peer(&self, peer_id: &str) -> Result<()> {
        let conn = self.record(peer_id).await?;
        self.workers.lock().await.remove(peer_id);
        conn.close().await
    }

    /// Close every record and stop the signal workers
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.workers.lock().await.clear();

        for conn in self.registry.all().await {
            if let Err(e) = conn.close().await {
                debug!("Closing {} during shutdown failed: {}", conn.peer_id(), e);
            }
        }
    }
}
