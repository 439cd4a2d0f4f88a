//! In-memory RTC backend for tests
//!
//! Records every call a peer record makes, in order, and lets tests inject
//! the callbacks a real backend would produce.

use super::{DataChannel, RtcConnector, RtcEvent, RtcSession};
use crate::peer::ConnectionState;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use peerlink_protocol::{IceCandidate, SessionDescription};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One call made on a [`MockSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CreateDataChannel(String),
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(IceCandidate),
    Close,
}

/// Connector handing out [`MockSession`]s
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    /// Applied to sessions created afterwards
    description_delay: Mutex<Duration>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every session created for `peer_id`, oldest first
    pub fn sessions_for(&self, peer_id: &str) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.peer_id == peer_id)
            .cloned()
            .collect()
    }

    /// Most recent session for `peer_id`
    pub fn latest(&self, peer_id: &str) -> Option<Arc<MockSession>> {
        self.sessions_for(peer_id).pop()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Make offers and answers of later sessions take `delay` to create
    pub fn delay_descriptions(&self, delay: Duration) {
        *self.description_delay.lock() = delay;
    }
}

#[async_trait]
impl RtcConnector for MockConnector {
    async fn create(
        &self,
        peer_id: &str,
    ) -> Result<(Arc<dyn RtcSession>, mpsc::UnboundedReceiver<RtcEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sessions = self.sessions.lock();
        let session = Arc::new(MockSession {
            peer_id: peer_id.to_string(),
            generation: sessions.len(),
            calls: Mutex::new(Vec::new()),
            events: tx,
            channel: Mutex::new(None),
            closed: AtomicBool::new(false),
            sdp_counter: AtomicUsize::new(0),
            description_delay: *self.description_delay.lock(),
        });
        sessions.push(Arc::clone(&session));
        Ok((session as Arc<dyn RtcSession>, rx))
    }
}

/// Scripted stand-in for one peer connection
pub struct MockSession {
    peer_id: String,
    generation: usize,
    calls: Mutex<Vec<MockCall>>,
    events: mpsc::UnboundedSender<RtcEvent>,
    channel: Mutex<Option<Arc<MockDataChannel>>>,
    closed: AtomicBool,
    sdp_counter: AtomicUsize,
    description_delay: Duration,
}

impl MockSession {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Candidates handed to `add_ice_candidate`, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::AddIceCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The outbound channel, or the one announced by [`announce_channel`](Self::announce_channel)
    pub fn channel(&self) -> Option<Arc<MockDataChannel>> {
        self.channel.lock().clone()
    }

    /// Inject a backend callback; false once the record's pump is gone
    pub fn emit(&self, event: RtcEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn emit_local_candidate(&self, candidate: &str) -> bool {
        self.emit(RtcEvent::LocalCandidate(IceCandidate::new(candidate)))
    }

    pub fn set_state(&self, state: ConnectionState) -> bool {
        self.emit(RtcEvent::ConnectionState(state))
    }

    /// Simulate the remote side opening a channel toward us
    pub fn announce_channel(&self, label: &str) -> Arc<MockDataChannel> {
        let channel = Arc::new(MockDataChannel::new(label));
        *self.channel.lock() = Some(Arc::clone(&channel));
        self.emit(RtcEvent::DataChannelAnnounced(
            Arc::clone(&channel) as Arc<dyn DataChannel>
        ));
        channel
    }

    /// Connected plus an open channel; announces one first on the answering side
    pub fn establish(&self, label: &str) {
        if self.channel().is_none() {
            self.announce_channel(label);
        }
        self.set_state(ConnectionState::Connected);
        self.emit(RtcEvent::ChannelOpen);
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    async fn pause(&self) {
        if !self.description_delay.is_zero() {
            tokio::time::sleep(self.description_delay).await;
        }
    }

    fn next_sdp(&self, kind: &str) -> String {
        let n = self.sdp_counter.fetch_add(1, Ordering::SeqCst);
        format!(
            "v=0\r\ns=mock-{}-{}-{}-{}\r\n",
            kind, self.peer_id, self.generation, n
        )
    }
}

#[async_trait]
impl RtcSession for MockSession {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        self.record(MockCall::CreateDataChannel(label.to_string()));
        let channel = Arc::new(MockDataChannel::new(label));
        *self.channel.lock() = Some(Arc::clone(&channel));
        Ok(channel as Arc<dyn DataChannel>)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(MockCall::CreateOffer);
        self.pause().await;
        Ok(SessionDescription::offer(self.next_sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(MockCall::CreateAnswer);
        self.pause().await;
        Ok(SessionDescription::answer(self.next_sdp("answer")))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(MockCall::SetRemoteDescription(description));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(MockCall::AddIceCandidate(candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(MockCall::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Data channel that records what was sent through it
pub struct MockDataChannel {
    label: String,
    sent: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make every following send fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) || self.is_closed() {
            return Err(Error::DataChannel("mock channel refused send".to_string()));
        }
        self.sent.lock().push(data);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calls_recorded_in_order() {
        let connector = MockConnector::new();
        let (session, _events) = connector.create("bob").await.unwrap();

        session.create_data_channel("peerlink").await.unwrap();
        session.create_offer().await.unwrap();
        session
            .add_ice_candidate(IceCandidate::new("candidate:1"))
            .await
            .unwrap();

        let mock = connector.latest("bob").unwrap();
        assert_eq!(
            mock.calls(),
            vec![
                MockCall::CreateDataChannel("peerlink".to_string()),
                MockCall::CreateOffer,
                MockCall::AddIceCandidate(IceCandidate::new("candidate:1")),
            ]
        );
    }

    #[tokio::test]
    async fn test_emit_reaches_receiver() {
        let connector = MockConnector::new();
        let (_session, mut events) = connector.create("bob").await.unwrap();

        assert!(connector.latest("bob").unwrap().emit_local_candidate("candidate:9"));
        match events.recv().await {
            Some(RtcEvent::LocalCandidate(c)) => assert_eq!(c.candidate, "candidate:9"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_channel_failure_injection() {
        let channel = MockDataChannel::new("peerlink");
        channel.send(Bytes::from_static(b"a")).await.unwrap();
        channel.fail_sends(true);
        assert!(channel.send(Bytes::from_static(b"b")).await.is_err());
        assert_eq!(channel.sent(), vec![Bytes::from_static(b"a")]);
    }
}
