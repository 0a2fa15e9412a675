//! Relay fan-out over real sockets
//!
//! The WebSocket transport and the relay binary's server half, end to end
//! on a random local port.

use std::time::Duration;
use telecare_call::signaling::{SignalRelay, SignalingTransport, WebSocketSignaling};
use telecare_call::Signal;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn relay_fans_out_to_all_subscribers_including_sender() {
    let relay = SignalRelay::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let transport = WebSocketSignaling::new(&relay.url());

    let (alice, mut alice_rx) = transport.subscribe("consultation:a1").await.unwrap();
    let (_bob, mut bob_rx) = transport.subscribe("consultation:a1").await.unwrap();
    let (_carol, mut carol_rx) = transport.subscribe("consultation:other").await.unwrap();

    let signal = Signal::Offer {
        sdp: "relayed".to_string(),
    };
    alice.publish(&signal).await.unwrap();

    // Delivered to everyone on the topic, the publisher included.
    for rx in [&mut alice_rx, &mut bob_rx] {
        let received = tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await.unwrap();
        assert_eq!(received, Some(signal.clone()));
    }

    // Other topics see nothing.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), carol_rx.recv())
            .await
            .is_err()
    );

    relay.shutdown().await;
}

#[tokio::test]
async fn relay_preserves_per_sender_order() {
    let relay = SignalRelay::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let transport = WebSocketSignaling::new(&relay.url());

    let (alice, _alice_rx) = transport.subscribe("consultation:a1").await.unwrap();
    let (_bob, mut bob_rx) = transport.subscribe("consultation:a1").await.unwrap();

    for i in 0..5 {
        alice
            .publish(&Signal::Ice {
                candidate: format!("candidate:{}", i),
                sdp_mid: None,
                sdp_m_line_index: None,
            })
            .await
            .unwrap();
    }

    for i in 0..5 {
        let received = tokio::time::timeout(RECV_TIMEOUT, bob_rx.recv())
            .await
            .unwrap();
        assert_eq!(
            received,
            Some(Signal::Ice {
                candidate: format!("candidate:{}", i),
                sdp_mid: None,
                sdp_m_line_index: None,
            })
        );
    }

    relay.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_closes_the_stream() {
    let relay = SignalRelay::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let transport = WebSocketSignaling::new(&relay.url());

    let (alice, mut alice_rx) = transport.subscribe("consultation:a1").await.unwrap();
    alice.unsubscribe().await.unwrap();

    let received = tokio::time::timeout(RECV_TIMEOUT, alice_rx.recv())
        .await
        .unwrap();
    assert_eq!(received, None);

    relay.shutdown().await;
}

#[tokio::test]
async fn publish_after_unsubscribe_fails() {
    let relay = SignalRelay::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let transport = WebSocketSignaling::new(&relay.url());

    let (alice, _alice_rx) = transport.subscribe("consultation:a1").await.unwrap();
    alice.unsubscribe().await.unwrap();

    assert!(alice.publish(&Signal::Leave).await.is_err());

    relay.shutdown().await;
}
