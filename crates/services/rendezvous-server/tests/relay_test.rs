//! Relay behaviour over real sockets on 127.0.0.1

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use peerlink_protocol::{Frame, FrameKind, MAX_FRAME_SIZE};
use peerlink_rendezvous::{RendezvousServer, ServerHandle};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

async fn start() -> ServerHandle {
    init_tracing();
    RendezvousServer::start("127.0.0.1:0")
        .await
        .expect("relay failed to bind")
}

fn frame(kind: FrameKind, sender: &str, target: &str, payload: &[u8]) -> Message {
    let data = Frame::new(kind, sender, target, Bytes::copy_from_slice(payload))
        .encode()
        .unwrap();
    Message::Binary(data.to_vec())
}

async fn recv_frame(ws: &mut Ws) -> Frame {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            Message::Binary(data) => return Frame::decode(Bytes::from(data)).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

/// Nothing arrives within a short window
async fn assert_silent(ws: &mut Ws) {
    if let Ok(Some(Ok(Message::Binary(data)))) =
        timeout(Duration::from_millis(200), ws.next()).await
    {
        panic!("unexpected frame: {:?}", Frame::decode(Bytes::from(data)));
    }
}

/// Connect and register, consuming the acknowledgment
async fn join(server: &ServerHandle, id: &str, room: &str) -> Ws {
    let (mut ws, _) = connect_async(server.url()).await.unwrap();
    ws.send(frame(FrameKind::Register, id, room, b"")).await.unwrap();

    let ack = recv_frame(&mut ws).await;
    assert_eq!(ack.kind, FrameKind::RegisterAck);
    assert_eq!(ack.target, id);
    ws
}

async fn wait_for_members(server: &ServerHandle, room: &str, expected: &[&str]) {
    let polled = timeout(WAIT, async {
        loop {
            let mut members = server.room_members(room).await;
            members.sort();
            if members == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "room {} never became {:?}", room, expected);
}

#[tokio::test]
async fn test_registration_announced_to_room() {
    let server = start().await;

    let mut alice = join(&server, "alice", "lobby").await;
    let mut other = join(&server, "oscar", "elsewhere").await;
    let _bob = join(&server, "bob", "lobby").await;

    let announcement = recv_frame(&mut alice).await;
    assert_eq!(announcement.kind, FrameKind::Register);
    assert_eq!(announcement.sender, "bob");
    assert_eq!(announcement.target, "lobby");

    // Other rooms hear nothing
    assert_silent(&mut other).await;
    wait_for_members(&server, "lobby", &["alice", "bob"]).await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_frames_forwarded_by_target() {
    let server = start().await;

    let mut alice = join(&server, "alice", "lobby").await;
    let mut bob = join(&server, "bob", "lobby").await;
    recv_frame(&mut alice).await; // bob's announcement

    let offer = br#"{"type":"offer","sdp":"v=0"}"#;
    alice
        .send(frame(FrameKind::Offer, "alice", "bob", offer))
        .await
        .unwrap();
    let got = recv_frame(&mut bob).await;
    assert_eq!(got.kind, FrameKind::Offer);
    assert_eq!(got.sender, "alice");
    assert_eq!(&got.payload[..], offer);

    bob.send(frame(FrameKind::Payload, "bob", "alice", &[0, 1, 2, 255]))
        .await
        .unwrap();
    let got = recv_frame(&mut alice).await;
    assert_eq!(got.kind, FrameKind::Payload);
    assert_eq!(&got.payload[..], &[0, 1, 2, 255]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_target_and_spoofed_sender_dropped() {
    let server = start().await;

    let mut alice = join(&server, "alice", "lobby").await;
    let mut bob = join(&server, "bob", "lobby").await;
    recv_frame(&mut alice).await;

    alice
        .send(frame(FrameKind::Payload, "alice", "nobody", b"lost"))
        .await
        .unwrap();
    alice
        .send(frame(FrameKind::Payload, "carol", "bob", b"spoofed"))
        .await
        .unwrap();
    assert_silent(&mut bob).await;

    // Connection still usable afterwards
    alice
        .send(frame(FrameKind::Payload, "alice", "bob", b"real"))
        .await
        .unwrap();
    assert_eq!(&recv_frame(&mut bob).await.payload[..], b"real");

    server.shutdown().await;
}

#[tokio::test]
async fn test_first_frame_must_register() {
    let server = start().await;

    let (mut ws, _) = connect_async(server.url()).await.unwrap();
    ws.send(frame(FrameKind::Payload, "alice", "bob", b"hi"))
        .await
        .unwrap();

    // Relay hangs up without acknowledging
    let next = timeout(WAIT, ws.next()).await.expect("relay kept the connection");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(server.client_count().await, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_cleans_up() {
    let server = start().await;

    let mut alice = join(&server, "alice", "lobby").await;
    let bob = join(&server, "bob", "lobby").await;
    recv_frame(&mut alice).await;
    wait_for_members(&server, "lobby", &["alice", "bob"]).await;

    drop(bob);
    wait_for_members(&server, "lobby", &["alice"]).await;
    assert_eq!(server.client_count().await, 1);

    // Frames for bob now go nowhere
    alice
        .send(frame(FrameKind::Payload, "alice", "bob", b"gone"))
        .await
        .unwrap();

    server.shutdown().await;
}

#[tokio::test]
async fn test_reregistration_replaces_connection() {
    let server = start().await;

    let mut alice = join(&server, "alice", "lobby").await;
    let _stale_bob = join(&server, "bob", "lobby").await;
    recv_frame(&mut alice).await;

    let mut bob = join(&server, "bob", "lobby").await;
    // The second registration is announced again
    let announcement = recv_frame(&mut alice).await;
    assert_eq!(announcement.sender, "bob");
    wait_for_members(&server, "lobby", &["alice", "bob"]).await;

    alice
        .send(frame(FrameKind::Payload, "alice", "bob", b"to the new one"))
        .await
        .unwrap();
    assert_eq!(&recv_frame(&mut bob).await.payload[..], b"to the new one");

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let server = start().await;

    let mut alice = join(&server, "alice", "lobby").await;
    let mut bob = join(&server, "bob", "lobby").await;
    recv_frame(&mut alice).await;

    // Header names a real target; the relay must refuse it while reading
    let mut oversized = Frame::new(FrameKind::Payload, "alice", "bob", Bytes::new())
        .encode()
        .unwrap()
        .to_vec();
    oversized.resize(MAX_FRAME_SIZE + 1, 0xAB);
    let _ = alice.send(Message::Binary(oversized)).await;

    wait_for_members(&server, "lobby", &["bob"]).await;
    assert_silent(&mut bob).await;

    server.shutdown().await;
}
