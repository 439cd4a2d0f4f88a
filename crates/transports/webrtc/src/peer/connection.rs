//! Per-peer negotiation state machine

use super::rtc::{DataChannel, RtcEvent, RtcSession};
use super::{ChannelState, ConnectionState, PeerSnapshot, Role};
use crate::signaling::Signaler;
use crate::{Error, Result};
use bytes::Bytes;
use peerlink_protocol::{IceCandidate, PeerSignal, SdpType, SessionDescription};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// Shared dependencies handed to every record
#[derive(Clone)]
pub struct PeerContext {
    pub signaler: Signaler,
    pub channel_label: String,
}

/// What a backend event means for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerNotice {
    /// Connection reached Connected
    Reachable,
    /// Payload arrived on the direct channel
    Payload(Bytes),
}

/// Offer/answer bookkeeping, guarded as one unit
#[derive(Default)]
struct Negotiation {
    /// Remote description applied; remote candidates may go straight through
    remote_description_set: bool,
    answer_applied: bool,
    /// Remote candidates that arrived before the remote description
    pending_remote: Vec<IceCandidate>,
    /// Our offer/answer went out; local candidates may follow it
    local_description_sent: bool,
    /// Local candidates gathered before our description was sent
    pending_local: Vec<IceCandidate>,
}

/// One negotiation with one remote peer
///
/// Records are owned by the registry. Backend callbacks reach a record only
/// through [`apply_event`](Self::apply_event), called by the record's event
/// pump; inbound signals arrive through the orchestrator's per-peer worker.
pub struct PeerConnection {
    /// Remote peer identifier
    peer_id: String,

    /// Generation of this negotiation
    connection_id: String,

    role: Role,

    session: Arc<dyn RtcSession>,

    context: PeerContext,

    state: RwLock<ConnectionState>,

    channel: RwLock<Option<Arc<dyn DataChannel>>>,

    channel_state: RwLock<ChannelState>,

    /// Held across description application and the candidate flush
    negotiation: Mutex<Negotiation>,
}

impl PeerConnection {
    pub fn new(
        peer_id: impl Into<String>,
        role: Role,
        session: Arc<dyn RtcSession>,
        context: PeerContext,
    ) -> Self {
        let peer_id = peer_id.into();
        let connection_id = uuid::Uuid::new_v4().to_string();

        debug!(
            "Creating peer record: peer_id={}, connection_id={}, role={:?}",
            peer_id, connection_id, role
        );

        Self {
            peer_id,
            connection_id,
            role,
            session,
            context,
            state: RwLock::new(ConnectionState::New),
            channel: RwLock::new(None),
            channel_state: RwLock::new(ChannelState::Absent),
            negotiation: Mutex::new(Negotiation::default()),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn channel_state(&self) -> ChannelState {
        *self.channel_state.read().await
    }

    pub async fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            connection_id: self.connection_id.clone(),
            role: self.role,
            connection_state: self.state().await,
            channel_state: self.channel_state().await,
            pending_candidates: self.negotiation.lock().await.pending_remote.len(),
        }
    }

    /// Move forward; backward and repeated moves are ignored
    async fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write().await;
        let current = *state;

        if !current.can_transition_to(next) {
            if current != next {
                debug!(
                    "Peer {} ignoring state transition {:?} -> {:?}",
                    self.peer_id, current, next
                );
            }
            return false;
        }

        debug!(
            "Peer {} state transition: {:?} -> {:?}",
            self.peer_id, current, next
        );
        *state = next;
        true
    }

    async fn set_channel_state(&self, next: ChannelState) {
        let mut state = self.channel_state.write().await;
        if *state == ChannelState::Closed || *state == next {
            return;
        }
        debug!(
            "Peer {} channel state: {:?} -> {:?}",
            self.peer_id, *state, next
        );
        *state = next;
    }

    async fn attach_channel(&self, channel: Arc<dyn DataChannel>) {
        *self.channel.write().await = Some(channel);
        if *self.channel_state.read().await == ChannelState::Absent {
            self.set_channel_state(ChannelState::Connecting).await;
        }
    }

    /// Start as offerer: create the channel and the offer, send the offer
    #[instrument(skip(self), fields(peer_id = %self.peer_id, connection_id = %self.connection_id))]
    pub async fn initiate(&self) -> Result<()> {
        if self.role != Role::Offerer {
            return Err(Error::PeerConnection(
                "initiate called on an answering connection".to_string(),
            ));
        }
        self.transition(ConnectionState::Connecting).await;

        let channel = self
            .session
            .create_data_channel(&self.context.channel_label)
            .await?;
        self.attach_channel(channel).await;

        let offer = self.session.create_offer().await?;
        self.send_local_description(PeerSignal::Offer(offer)).await?;

        info!("Sent offer to {}", self.peer_id);
        Ok(())
    }

    /// Answer an inbound offer
    ///
    /// The inbound data channel is picked up later from backend events.
    #[instrument(skip(self, offer), fields(peer_id = %self.peer_id, connection_id = %self.connection_id))]
    pub async fn accept_offer(&self, offer: SessionDescription) -> Result<()> {
        if self.role != Role::Answerer {
            return Err(Error::Sdp(format!(
                "offer from {} applied to an offering connection",
                self.peer_id
            )));
        }
        if offer.sdp_type != SdpType::Offer {
            return Err(Error::Sdp(format!(
                "expected offer from {}, got {:?}",
                self.peer_id, offer.sdp_type
            )));
        }
        self.transition(ConnectionState::Connecting).await;

        {
            let mut negotiation = self.negotiation.lock().await;
            self.session.set_remote_description(offer).await?;
            negotiation.remote_description_set = true;
            self.flush_remote_candidates(&mut negotiation).await;
        }

        let answer = self.session.create_answer().await?;
        self.send_local_description(PeerSignal::Answer(answer)).await?;

        info!("Sent answer to {}", self.peer_id);
        Ok(())
    }

    /// Apply the answer to our offer; only the first one counts
    #[instrument(skip(self, answer), fields(peer_id = %self.peer_id, connection_id = %self.connection_id))]
    pub async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        if self.role != Role::Offerer {
            return Err(Error::Sdp(format!(
                "answer from {} received on an answering connection",
                self.peer_id
            )));
        }

        let mut negotiation = self.negotiation.lock().await;
        if negotiation.answer_applied {
            warn!("Duplicate answer from {}, keeping current connection", self.peer_id);
            return Err(Error::DuplicateAnswer(self.peer_id.clone()));
        }

        self.session.set_remote_description(answer).await?;
        negotiation.answer_applied = true;
        negotiation.remote_description_set = true;
        self.flush_remote_candidates(&mut negotiation).await;

        debug!("Applied answer from {}", self.peer_id);
        Ok(())
    }

    /// Apply a remote candidate, or queue it until the remote description is set
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.state().await.is_terminal() {
            debug!("Dropping candidate for closed record {}", self.peer_id);
            return Ok(());
        }

        let mut negotiation = self.negotiation.lock().await;
        if !negotiation.remote_description_set {
            negotiation.pending_remote.push(candidate);
            debug!(
                "Queued early candidate from {} ({} pending)",
                self.peer_id,
                negotiation.pending_remote.len()
            );
            return Ok(());
        }

        self.session.add_ice_candidate(candidate).await
    }

    /// Apply queued remote candidates in arrival order
    async fn flush_remote_candidates(&self, negotiation: &mut Negotiation) {
        let pending = std::mem::take(&mut negotiation.pending_remote);
        if pending.is_empty() {
            return;
        }

        debug!(
            "Flushing {} queued candidates for {}",
            pending.len(),
            self.peer_id
        );
        for candidate in pending {
            // One bad candidate must not block the rest
            if let Err(e) = self.session.add_ice_candidate(candidate).await {
                warn!("Failed to apply queued candidate for {}: {}", self.peer_id, e);
            }
        }
    }

    /// Send our offer/answer, then any local candidates gathered meanwhile
    ///
    /// Fails without sending if the record was closed while the description
    /// was being created.
    async fn send_local_description(&self, description: PeerSignal) -> Result<()> {
        let mut negotiation = self.negotiation.lock().await;
        if self.state().await.is_terminal() {
            warn!(
                "Connection {} to {} closed during negotiation, not sending {:?}",
                self.connection_id,
                self.peer_id,
                description.kind()
            );
            return Err(Error::PeerConnection(format!(
                "connection to {} closed during negotiation",
                self.peer_id
            )));
        }

        self.context
            .signaler
            .send_signal(&self.peer_id, &description)?;
        negotiation.local_description_sent = true;

        for candidate in std::mem::take(&mut negotiation.pending_local) {
            self.send_local_candidate(candidate);
        }
        Ok(())
    }

    fn send_local_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self
            .context
            .signaler
            .send_signal(&self.peer_id, &PeerSignal::Candidate(candidate))
        {
            warn!("Failed to forward local candidate to {}: {}", self.peer_id, e);
        }
    }

    async fn forward_local_candidate(&self, candidate: IceCandidate) {
        let mut negotiation = self.negotiation.lock().await;
        if negotiation.local_description_sent {
            self.send_local_candidate(candidate);
        } else {
            negotiation.pending_local.push(candidate);
        }
    }

    /// Handle one backend callback
    pub async fn apply_event(&self, event: RtcEvent) -> Option<PeerNotice> {
        if self.state().await.is_terminal() {
            debug!("Peer {} ignoring {:?} after close", self.peer_id, event);
            return None;
        }

        match event {
            RtcEvent::LocalCandidate(candidate) => {
                self.forward_local_candidate(candidate).await;
                None
            }
            RtcEvent::ConnectionState(next) => {
                if self.transition(next).await && next == ConnectionState::Connected {
                    info!("Peer {} connected", self.peer_id);
                    Some(PeerNotice::Reachable)
                } else {
                    None
                }
            }
            RtcEvent::DataChannelAnnounced(channel) => {
                debug!(
                    "Peer {} announced data channel '{}'",
                    self.peer_id,
                    channel.label()
                );
                self.attach_channel(channel).await;
                None
            }
            RtcEvent::ChannelOpen => {
                self.set_channel_state(ChannelState::Open).await;
                None
            }
            RtcEvent::ChannelClosed => {
                self.set_channel_state(ChannelState::Closed).await;
                None
            }
            RtcEvent::Message(data) => Some(PeerNotice::Payload(data)),
        }
    }

    /// The direct channel, if Connected and Open
    pub async fn direct_channel(&self) -> Option<Arc<dyn DataChannel>> {
        if self.state().await != ConnectionState::Connected {
            return None;
        }
        if self.channel_state().await != ChannelState::Open {
            return None;
        }
        self.channel.read().await.clone()
    }

    /// Close the channel and the session; the record stays as Closed
    pub async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);

        self.transition(ConnectionState::Closed).await;

        let channel = self.channel.write().await.take();
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                debug!("Channel close for {} failed: {}", self.peer_id, e);
            }
        }
        self.set_channel_state(ChannelState::Closed).await;

        self.session.close().await
    }
}
