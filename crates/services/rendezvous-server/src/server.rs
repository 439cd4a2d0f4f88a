//! WebSocket accept loop and per-connection relay

use crate::directory::Directory;
use crate::{Error, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use peerlink_protocol::{validate_identifier, Frame, FrameKind, MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::{protocol::WebSocketConfig, Message};
use tracing::{debug, error, info, warn};

/// Shared relay state
struct RelayState {
    directory: RwLock<Directory>,
    next_conn: AtomicU64,
}

/// Rendezvous relay
///
/// Introduces peers that share a room and forwards their frames by target
/// id. Frame contents are never inspected beyond the header.
pub struct RendezvousServer;

impl RendezvousServer {
    /// Bind `addr` and start accepting connections
    ///
    /// Returns once the listener is bound; use port 0 to let the OS choose.
    pub async fn start(addr: &str) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(RelayState {
            directory: RwLock::new(Directory::new()),
            next_conn: AtomicU64::new(1),
        });

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let connection_shutdown = shutdown_tx.clone();
        let accept_state = Arc::clone(&state);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                debug!("Accepted connection from {}", peer_addr);
                                let state = Arc::clone(&accept_state);
                                let shutdown = connection_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, state, shutdown).await {
                                        warn!("Connection from {} ended with error: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Rendezvous relay received shutdown signal");
                        break;
                    }
                }
            }

            info!("Rendezvous relay accept loop exited");
        });

        info!("Rendezvous relay listening on ws://{}", local_addr);

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
            state,
        })
    }
}

/// Handle for a running relay
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
    state: Arc<RelayState>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub async fn client_count(&self) -> usize {
        self.state.directory.read().await.client_count()
    }

    pub async fn room_members(&self, room: &str) -> Vec<String> {
        self.state.directory.read().await.room_members(room)
    }

    /// Stop accepting and close every connection
    pub async fn shutdown(self) {
        info!("Shutting down rendezvous relay");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Accept loop panicked: {}", e);
        }
    }
}

/// Oversized messages are refused while reading, before they are buffered
fn websocket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_FRAME_SIZE);
    config.max_frame_size = Some(MAX_FRAME_SIZE);
    config
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<RelayState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let ws_stream = accept_async_with_config(stream, Some(websocket_config())).await?;
    let (mut write, mut read) = ws_stream.split();

    // The first frame decides who this connection is
    let raw = loop {
        match read.next().await {
            Some(Ok(Message::Binary(data))) => break Bytes::from(data),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(other)) => {
                return Err(Error::RegistrationRequired(format!(
                    "expected a binary frame, got {:?}",
                    other
                )))
            }
            Some(Err(e)) => return Err(e.into()),
        }
    };

    let registration = Frame::decode(raw.clone())?;
    if registration.kind != FrameKind::Register {
        return Err(Error::RegistrationRequired(format!(
            "first frame was {:?}",
            registration.kind
        )));
    }
    validate_identifier(&registration.sender)?;
    validate_identifier(&registration.target)?;

    let client_id = registration.sender;
    let room = registration.target;
    let conn_id = state.next_conn.fetch_add(1, Ordering::SeqCst);

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    // Ack is queued before anything a room member can send us
    let ack = Frame::new(
        FrameKind::RegisterAck,
        room.as_str(),
        client_id.as_str(),
        Bytes::new(),
    )
    .encode()?;
    let _ = tx.send(ack);

    let members = state
        .directory
        .write()
        .await
        .join(&client_id, &room, conn_id, tx);
    for member in &members {
        let _ = member.send(raw.clone());
    }
    info!(
        "Client '{}' joined room '{}' ({} already there)",
        client_id,
        room,
        members.len()
    );

    // Ends when the directory drops our queue
    let writer = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = write.send(Message::Binary(data.to_vec())).await {
                debug!("Failed to write to client: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    let result: Result<()> = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if !state.directory.read().await.is_current(&client_id, conn_id) {
                        info!("Connection {} of '{}' was replaced, closing", conn_id, client_id);
                        break Ok(());
                    }
                    if let Err(e) = forward(&state, &client_id, Bytes::from(data)).await {
                        break Err(e);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            },
            _ = shutdown.recv() => break Ok(()),
        }
    };

    if state.directory.write().await.leave(&client_id, conn_id) {
        info!("Client '{}' disconnected", client_id);
    }
    let _ = writer.await;

    result
}

/// Forward one frame to its target, unchanged
async fn forward(state: &RelayState, client_id: &str, data: Bytes) -> Result<()> {
    let frame = Frame::decode(data.clone())?;

    if frame.sender != client_id {
        warn!(
            "Dropping frame from '{}' claiming to be '{}'",
            client_id, frame.sender
        );
        return Ok(());
    }
    if matches!(frame.kind, FrameKind::Register | FrameKind::RegisterAck) {
        debug!("Ignoring {:?} from registered client '{}'", frame.kind, client_id);
        return Ok(());
    }

    match state.directory.read().await.route(&frame.target) {
        Some(target) => {
            debug!(
                "Forwarding {:?} from '{}' to '{}', {} bytes",
                frame.kind,
                client_id,
                frame.target,
                frame.payload.len()
            );
            let _ = target.send(data);
        }
        None => {
            debug!(
                "Dropping {:?} from '{}': unknown target '{}'",
                frame.kind, client_id, frame.target
            );
        }
    }
    Ok(())
}
