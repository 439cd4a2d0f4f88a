//! PeerLink orchestration test harness
//!
//! Provides infrastructure for driving an [`Orchestrator`] without a network:
//! - [`RecordingSink`] stands in for the signaling transport and captures
//!   every frame the node writes
//! - [`TestNode`] wires an orchestrator to the mock RTC backend and a
//!   [`ChannelHooks`] receiver
//! - Inbound relay frames are built with the remote peer's own codec
//!
//! Basic usage pattern:
//!
//! 1. `TestNode::registered("alice").await`
//! 2. Feed inbound frames with `signal_from` / `payload_from`
//! 3. Drive the backend through `node.session(peer)` (a `MockSession`)
//! 4. Assert on `node.sink`, the mock calls, and `node.next_event()`

#![allow(dead_code)]

pub mod sink;

use peerlink_protocol::{
    BinaryEnvelopeCodec, EnvelopeCodec, Frame, FrameKind, IceCandidate, PeerSignal,
    SessionDescription,
};
use peerlink_webrtc::hooks::{ChannelHooks, HookEvent};
use peerlink_webrtc::peer::rtc::mock::{MockConnector, MockSession};
use peerlink_webrtc::signaling::{Registration, SignalingSink};
use peerlink_webrtc::{Orchestrator, PeerLinkConfig, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use sink::RecordingSink;

pub const ROOM: &str = "lobby";
pub const LABEL: &str = "peerlink";

/// How long any single wait may take before the test fails
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, failing the test after [`WAIT`]
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(WAIT, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    if polled.is_err() {
        panic!("timed out waiting for {}", what);
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host", n, n))
}

/// One orchestrator on the mock backend
pub struct TestNode {
    pub id: String,
    pub orchestrator: Arc<Orchestrator>,
    pub connector: Arc<MockConnector>,
    pub sink: Arc<RecordingSink>,
    pub registration: Arc<Registration>,
    events: mpsc::UnboundedReceiver<HookEvent>,
}

impl TestNode {
    pub fn new(id: &str) -> Self {
        Self::with_config(PeerLinkConfig::new("ws://relay.test", ROOM, id))
    }

    pub fn with_config(config: PeerLinkConfig) -> Self {
        init_tracing();

        let id = config.peer_id.clone();
        let codec = Arc::new(BinaryEnvelopeCodec::new(&id, &config.room).unwrap());
        let sink = RecordingSink::new();
        let registration = Arc::new(Registration::new());
        let connector = MockConnector::new();
        let (hooks, events) = ChannelHooks::new();

        let orchestrator = Orchestrator::new(
            &config,
            codec,
            Arc::clone(&sink) as Arc<dyn SignalingSink>,
            Arc::clone(&registration),
            Arc::clone(&connector) as Arc<dyn peerlink_webrtc::peer::rtc::RtcConnector>,
            Arc::new(hooks),
        );

        Self {
            id,
            orchestrator,
            connector,
            sink,
            registration,
            events,
        }
    }

    /// A node whose registration the relay has acknowledged
    pub async fn registered(id: &str) -> Self {
        let node = Self::new(id);
        node.ack().await;
        node
    }

    pub async fn deliver(&self, frame: bytes::Bytes) -> Result<()> {
        self.orchestrator.handle_inbound(frame).await
    }

    /// Relay acknowledgment of our registration
    pub async fn ack(&self) {
        let ack = Frame::new(FrameKind::RegisterAck, "", self.id.as_str(), bytes::Bytes::new())
            .encode()
            .unwrap();
        self.deliver(ack).await.unwrap();
        assert!(self.registration.is_registered());
    }

    /// Inbound signal from `peer`, as the relay would forward it
    pub async fn signal_from(&self, peer: &str, signal: PeerSignal) {
        let remote = BinaryEnvelopeCodec::new(peer, ROOM).unwrap();
        let wire = remote.encode_signal(&self.id, &signal).unwrap();
        self.deliver(wire).await.unwrap();
    }

    pub async fn offer_from(&self, peer: &str, sdp: &str) {
        self.signal_from(peer, PeerSignal::Offer(SessionDescription::offer(sdp)))
            .await;
    }

    pub async fn answer_from(&self, peer: &str, sdp: &str) {
        self.signal_from(peer, PeerSignal::Answer(SessionDescription::answer(sdp)))
            .await;
    }

    pub async fn candidate_from(&self, peer: &str, n: u32) {
        self.signal_from(peer, PeerSignal::Candidate(candidate(n))).await;
    }

    pub async fn payload_from(&self, peer: &str, payload: &[u8]) {
        let remote = BinaryEnvelopeCodec::new(peer, ROOM).unwrap();
        let wire = remote.encode_peer_payload(&self.id, payload).unwrap();
        self.deliver(wire).await.unwrap();
    }

    /// Latest mock session for `peer`, waiting for it to be created
    pub async fn session(&self, peer: &str) -> Arc<MockSession> {
        let connector = Arc::clone(&self.connector);
        wait_until(&format!("session for {}", peer), || {
            let found = connector.latest(peer).is_some();
            async move { found }
        })
        .await;
        self.connector.latest(peer).unwrap()
    }

    /// Next hook invocation, failing the test after [`WAIT`]
    pub async fn next_event(&mut self) -> HookEvent {
        match tokio::time::timeout(WAIT, self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("hook channel closed"),
            Err(_) => panic!("timed out waiting for a hook event on {}", self.id),
        }
    }

    /// Hook events already delivered, without waiting
    pub fn drain_events(&mut self) -> Vec<HookEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the record of `peer` to satisfy `check`
    pub async fn wait_for_peer<F>(&self, peer: &str, what: &str, check: F)
    where
        F: Fn(&peerlink_webrtc::PeerSnapshot) -> bool,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        let check = &check;
        wait_until(what, || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .peer(peer)
                    .await
                    .map(|snapshot| check(&snapshot))
                    .unwrap_or(false)
            }
        })
        .await;
    }
}
