//! WebSocket signaling client for the rendezvous relay

use super::{Registration, RegistrationState, SignalingEvent, SignalingSink};
use crate::{Error, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Channels of one open connection
struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedSender<SignalingEvent>,
}

/// WebSocket client for the binary relay protocol
///
/// There is no internal queueing and no reconnect: sends while closed fail
/// with `TransportUnavailable`, and closure is reported once as
/// [`SignalingEvent::Closed`].
pub struct SignalingClient {
    /// Relay URL
    url: String,

    /// Set while the connection is usable
    open: Arc<AtomicBool>,

    /// Claimed by the one `open` call allowed to connect
    opening: AtomicBool,

    /// Channels of the current connection
    link: Mutex<Option<Link>>,

    registration: Arc<Registration>,
}

impl SignalingClient {
    /// Create a new signaling client
    ///
    /// # Arguments
    ///
    /// * `url` - Relay URL (ws:// or wss://)
    /// * `registration` - State advanced to Registering once the registration is sent
    pub fn new(url: impl Into<String>, registration: Arc<Registration>) -> Self {
        Self {
            url: url.into(),
            open: Arc::new(AtomicBool::new(false)),
            opening: AtomicBool::new(false),
            link: Mutex::new(None),
            registration,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect, send the registration envelope first, and start the I/O tasks
    ///
    /// Returns the stream of inbound envelopes and the final close event.
    #[instrument(skip(self, registration), fields(url = %self.url))]
    pub async fn open(
        &self,
        registration: Bytes,
    ) -> Result<mpsc::UnboundedReceiver<SignalingEvent>> {
        if self
            .opening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::WebSocket("signaling transport already opening".to_string()));
        }
        let _opening = OpeningGuard(&self.opening);

        if self.open.load(Ordering::SeqCst) {
            return Err(Error::WebSocket("signaling transport already open".to_string()));
        }

        info!("Connecting to rendezvous relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to connect: {}", e)))?;

        info!("Connected to rendezvous relay");

        let (write, read) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        // Registration goes out before anything else can be queued
        outbound_tx
            .send(Message::Binary(registration.to_vec()))
            .map_err(|_| Error::WebSocket("writer channel closed".to_string()))?;

        self.open.store(true, Ordering::SeqCst);
        *self.link.lock() = Some(Link {
            outbound: outbound_tx,
            events: events_tx.clone(),
        });

        tokio::spawn(Self::sender_task(
            write,
            outbound_rx,
            Arc::clone(&self.open),
            events_tx.clone(),
        ));
        tokio::spawn(Self::receiver_task(read, Arc::clone(&self.open), events_tx));

        self.registration.set(RegistrationState::Registering);
        Ok(events_rx)
    }

    /// Close the connection; reports `Closed` if it was still open
    pub fn close(&self) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            report_closed(&self.open, &link.events, "closed locally");
            let _ = link.outbound.send(Message::Close(None));
        }
        self.registration.set(RegistrationState::Unregistered);
    }

    /// Sender task: drains the outbound channel into the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        open: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                report_closed(&open, &events, &format!("send failed: {}", e));
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Receiver task: surfaces binary frames as events
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        open: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        let reason = loop {
            match read.next().await {
                Some(Ok(Message::Binary(data))) => {
                    if events.send(SignalingEvent::Message(Bytes::from(data))).is_err() {
                        break "event receiver dropped".to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Relay closed the connection");
                    break frame
                        .map(|f| format!("closed by relay: {}", f.reason))
                        .unwrap_or_else(|| "closed by relay".to_string());
                }
                Some(Ok(Message::Text(text))) => {
                    warn!("Ignoring text frame from relay ({} bytes)", text.len());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break format!("websocket error: {}", e);
                }
                None => break "connection ended".to_string(),
            }
        };

        report_closed(&open, &events, &reason);
        debug!("Receiver task terminated");
    }
}

/// Releases the `opening` claim however `open` returns
struct OpeningGuard<'a>(&'a AtomicBool);

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Flip the open flag and emit `Closed`, only for the first caller
fn report_closed(open: &AtomicBool, events: &mpsc::UnboundedSender<SignalingEvent>, reason: &str) {
    if open.swap(false, Ordering::SeqCst) {
        info!("Signaling transport closed: {}", reason);
        let _ = events.send(SignalingEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, data: Bytes) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            warn!("Signaling send while transport closed");
            return Err(Error::TransportUnavailable(
                "signaling transport is not open".to_string(),
            ));
        }

        let link = self.link.lock();
        let link = link.as_ref().ok_or_else(|| {
            Error::TransportUnavailable("signaling transport is not open".to_string())
        })?;
        link.outbound
            .send(Message::Binary(data.to_vec()))
            .map_err(|_| Error::TransportUnavailable("writer task stopped".to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
