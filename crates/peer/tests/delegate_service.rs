//! Integration tests for the delegate service on a single node:
//! local-agent delivery, delegate-to-delegate forwarding, shutdown.

mod common;

use std::time::Duration;

use tokio::time::timeout;

use acn_peer::AcnPeer;
use common::{agent_channel, free_port, loopback_config, sample_envelope, DelegateClient};

#[tokio::test(flavor = "multi_thread")]
async fn test_delegate_to_local_agent_roundtrip() {
    acn_logging::init_test();

    let (process, mut agent_rx) = agent_channel();
    let mut config = loopback_config();
    config.delegate_port = free_port();
    config.my_agent_address = Some("agent_local".to_string());
    config.process_envelope = Some(process);
    let delegate_port = config.delegate_port;

    let peer = AcnPeer::new(config).await.expect("peer should start");

    let mut client = DelegateClient::connect(delegate_port, "agent_client")
        .await
        .expect("handshake should complete");

    let envelope = sample_envelope("agent_local", "agent_client");
    client.send(&envelope).await.expect("send should succeed");

    let received = timeout(Duration::from_secs(10), agent_rx.recv())
        .await
        .expect("agent should receive the envelope in time")
        .expect("agent channel should stay open");

    assert_eq!(received, envelope);
    assert_eq!(received.message, b"test payload");

    peer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delegate_to_delegate_same_node() {
    acn_logging::init_test();

    let mut config = loopback_config();
    config.delegate_port = free_port();
    let delegate_port = config.delegate_port;

    let peer = AcnPeer::new(config).await.expect("peer should start");

    let mut client1 = DelegateClient::connect(delegate_port, "agent_one")
        .await
        .expect("first handshake");
    let mut client2 = DelegateClient::connect(delegate_port, "agent_two")
        .await
        .expect("second handshake");

    let envelope = sample_envelope("agent_two", "agent_one");
    client1.send(&envelope).await.expect("send should succeed");

    let received = timeout(Duration::from_secs(10), client2.recv())
        .await
        .expect("second client should receive the envelope in time")
        .expect("read should succeed");

    assert_eq!(received, envelope);

    peer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_destination_is_not_delivered_back() {
    acn_logging::init_test();

    let mut config = loopback_config();
    config.delegate_port = free_port();
    let delegate_port = config.delegate_port;

    let peer = AcnPeer::new(config).await.expect("peer should start");

    let mut client = DelegateClient::connect(delegate_port, "agent_one")
        .await
        .expect("handshake");

    // No such destination anywhere; the router fails the lookup and the
    // sender must not get anything echoed back.
    let envelope = sample_envelope("agent_nowhere", "agent_one");
    client.send(&envelope).await.expect("send should succeed");

    let echoed = timeout(Duration::from_secs(2), client.recv()).await;
    assert!(echoed.is_err(), "nothing should come back to the sender");

    peer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_frees_sockets() {
    acn_logging::init_test();

    let mut config = loopback_config();
    config.delegate_port = free_port();
    let delegate_port = config.delegate_port;

    let peer = AcnPeer::new(config).await.expect("peer should start");

    let mut client = DelegateClient::connect(delegate_port, "agent_one")
        .await
        .expect("handshake");

    let errors = peer.close().await;
    assert!(errors.is_empty(), "clean shutdown expected, got {:?}", errors);

    // The delegate socket answers EOF to its peer.
    let read_after_close = timeout(Duration::from_secs(10), client.recv())
        .await
        .expect("read should resolve after close");
    assert!(
        read_after_close.unwrap_err().is_eof(),
        "client should see a clean EOF"
    );

    // The listener port accepts a new bind immediately.
    let rebind = tokio::net::TcpListener::bind(("127.0.0.1", delegate_port)).await;
    assert!(rebind.is_ok(), "delegate port should be free after close");
}
