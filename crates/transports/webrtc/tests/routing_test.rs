//! Route selection and inbound dispatch

mod harness;

use bytes::Bytes;
use harness::TestNode;
use peerlink_protocol::{BinaryEnvelopeCodec, EnvelopeCodec};
use peerlink_webrtc::hooks::{ChannelHooks, HookEvent};
use peerlink_webrtc::peer::rtc::mock::MockConnector;
use peerlink_webrtc::peer::rtc::{RtcConnector, RtcEvent};
use peerlink_webrtc::{
    ChannelState, ConnectionState, Error, PeerLinkConfig, PeerLinkTransport, RegistrationState,
    Route,
};
use std::sync::Arc;

/// Direct exactly when Connected and Open, for every reachable combination
#[tokio::test]
async fn test_direct_iff_connected_and_open() {
    let connection_paths: &[(&[ConnectionState], ConnectionState)] = &[
        (&[], ConnectionState::Connecting),
        (&[ConnectionState::Connected], ConnectionState::Connected),
        (
            &[ConnectionState::Connected, ConnectionState::Disconnected],
            ConnectionState::Disconnected,
        ),
        (&[ConnectionState::Failed], ConnectionState::Failed),
    ];
    // Number of steps along Open -> Closed
    let channel_paths: &[(usize, ChannelState)] = &[
        (0, ChannelState::Connecting),
        (1, ChannelState::Open),
        (2, ChannelState::Closed),
    ];

    let alice = TestNode::registered("alice").await;
    let mut n = 0;

    for (states, expected_state) in connection_paths {
        for (channel_steps, expected_channel) in channel_paths {
            n += 1;
            let peer = format!("peer-{}", n);
            alice.orchestrator.initiate(&peer).await.unwrap();
            let session = alice.session(&peer).await;

            if *channel_steps >= 1 {
                session.emit(RtcEvent::ChannelOpen);
            }
            if *channel_steps >= 2 {
                session.emit(RtcEvent::ChannelClosed);
            }
            for state in states.iter() {
                session.set_state(*state);
            }

            let (want_state, want_channel) = (*expected_state, *expected_channel);
            alice
                .wait_for_peer(&peer, "backend events applied", move |s| {
                    s.connection_state == want_state && s.channel_state == want_channel
                })
                .await;

            let direct = want_state == ConnectionState::Connected
                && want_channel == ChannelState::Open;
            let route = alice.orchestrator.send(&peer, b"ping").await.unwrap();
            assert_eq!(
                route,
                if direct { Route::Direct } else { Route::Relay },
                "{:?} / {:?}",
                want_state,
                want_channel
            );
        }
    }
}

#[tokio::test]
async fn test_failing_direct_send_is_data_channel_error() {
    let alice = TestNode::registered("alice").await;
    alice.orchestrator.initiate("bob").await.unwrap();
    let session = alice.session("bob").await;
    session.establish(harness::LABEL);
    alice
        .wait_for_peer("bob", "direct channel", |s| s.is_direct())
        .await;

    session.channel().unwrap().fail_sends(true);
    let relayed = alice.sink.payloads_to("bob").len();

    let err = alice.orchestrator.send("bob", b"lost").await.unwrap_err();
    assert!(matches!(err, Error::DataChannel(_)));
    // No silent fallback to the relay
    assert_eq!(alice.sink.payloads_to("bob").len(), relayed);
}

#[tokio::test]
async fn test_relay_requires_registration() {
    let alice = TestNode::new("alice");
    assert_eq!(alice.registration.state(), RegistrationState::Unregistered);

    let err = alice.orchestrator.send("bob", b"early").await.unwrap_err();
    assert!(matches!(err, Error::NotRegistered));
    assert_eq!(alice.sink.count(), 0);

    // The offer cannot go out either; the attempt is closed
    let err = alice.orchestrator.initiate("bob").await.unwrap_err();
    assert!(matches!(err, Error::NotRegistered));
    assert_eq!(
        alice.orchestrator.peer("bob").await.unwrap().connection_state,
        ConnectionState::Closed
    );

    alice.ack().await;
    alice.orchestrator.initiate("bob").await.unwrap();
    assert_eq!(
        alice.orchestrator.send("bob", b"later").await.unwrap(),
        Route::Relay
    );
}

#[tokio::test]
async fn test_relay_requires_open_transport() {
    let alice = TestNode::registered("alice").await;
    alice.sink.set_open(false);

    let err = alice.orchestrator.send("bob", b"x").await.unwrap_err();
    assert!(matches!(err, Error::TransportUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_frames_dropped() {
    let alice = TestNode::registered("alice").await;
    alice.orchestrator.initiate("bob").await.unwrap();
    let before = alice.orchestrator.peer("bob").await.unwrap();

    for garbage in [
        Bytes::from_static(b""),
        Bytes::from_static(b"\x7f\x00\x00"),
        Bytes::from_static(b"\x10\x03bob\x05alice{not json"),
    ] {
        let err = alice.deliver(garbage).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    // Addressed to someone else
    let carol = BinaryEnvelopeCodec::new("carol", harness::ROOM).unwrap();
    let stray = carol.encode_peer_payload("dave", b"not for alice").unwrap();
    assert!(alice.deliver(stray).await.is_err());

    assert_eq!(alice.orchestrator.peer("bob").await.unwrap(), before);
}

#[tokio::test]
async fn test_announcement_reaches_hooks() {
    let mut alice = TestNode::registered("alice").await;
    let bob = BinaryEnvelopeCodec::new("bob", harness::ROOM).unwrap();

    alice.deliver(bob.encode_registration().unwrap()).await.unwrap();
    assert_eq!(alice.next_event().await, HookEvent::PeerAnnounced("bob".to_string()));
    assert!(alice.orchestrator.peer("bob").await.is_none());
}

#[tokio::test]
async fn test_transport_facade_gates_on_registration() {
    let (hooks, _events) = ChannelHooks::new();
    let connector: Arc<dyn RtcConnector> = MockConnector::new();
    let transport = PeerLinkTransport::with_connector(
        PeerLinkConfig::new("ws://127.0.0.1:9", "lobby", "alice"),
        connector,
        Arc::new(hooks),
    )
    .unwrap();

    assert_eq!(transport.local_peer_id(), "alice");
    assert_eq!(transport.registration_state(), RegistrationState::Unregistered);
    assert!(matches!(
        transport.initiate("bob").await,
        Err(Error::NotRegistered)
    ));
    assert!(matches!(
        transport.send("bob", b"x").await,
        Err(Error::TransportUnavailable(_))
    ));
    assert!(transport.list_peers().await.is_empty());
    assert!(!transport.storage_ready());
}

#[tokio::test]
async fn test_transport_rejects_invalid_config() {
    let (hooks, _events) = ChannelHooks::new();
    let result = PeerLinkTransport::new(
        PeerLinkConfig::new("http://not-a-websocket", "lobby", "alice"),
        Arc::new(hooks),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
