//! Signaling sink that records instead of sending

use bytes::Bytes;
use parking_lot::Mutex;
use peerlink_protocol::{Frame, FrameKind, PeerSignal};
use peerlink_webrtc::signaling::SignalingSink;
use peerlink_webrtc::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Captures every frame written to the relay
pub struct RecordingSink {
    sent: Mutex<Vec<Bytes>>,
    open: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        })
    }

    /// Simulate the relay connection going away (or coming back)
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .map(|data| Frame::decode(data.clone()).expect("node wrote a malformed frame"))
            .collect()
    }

    /// Signals sent to `peer`, in send order
    pub fn signals_to(&self, peer: &str) -> Vec<PeerSignal> {
        self.frames()
            .into_iter()
            .filter(|f| f.target == peer && f.kind.is_signal())
            .map(|f| PeerSignal::from_frame(f.kind, &f.payload).unwrap())
            .collect()
    }

    /// Relayed payloads sent to `peer`, in send order
    pub fn payloads_to(&self, peer: &str) -> Vec<Bytes> {
        self.frames()
            .into_iter()
            .filter(|f| f.target == peer && f.kind == FrameKind::Payload)
            .map(|f| f.payload)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl SignalingSink for RecordingSink {
    fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::TransportUnavailable(
                "recording sink closed".to_string(),
            ));
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
