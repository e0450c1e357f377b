//! Multi-node integration tests: relay registration, DHT-backed lookup,
//! address resolution and announcement idempotency.

mod common;

use std::time::Duration;

use anyhow::ensure;
use futures::AsyncWriteExt;
use tokio::time::timeout;

use acn_codec::{read_bytes, read_string, write_bytes};
use acn_network::{
    build_swarm, parse_bootstrap_addr, Control, HostConfig, Multiaddr, NetworkHandle, PeerId,
    SwarmDriver, ADDRESS_PROTOCOL, REGISTER_RELAY_PROTOCOL,
};
use acn_peer::AcnPeer;
use common::{agent_channel, free_port, loopback_config, sample_envelope, wait_for_announced};

/// Bootstrap entry (peer id + dial address) for a running peer.
fn bootstrap_entry(peer: &AcnPeer) -> (PeerId, Multiaddr) {
    parse_bootstrap_addr(&peer.multiaddr().to_string()).expect("peer multiaddr should parse")
}

/// A lightweight overlay client: dials peers and opens raw protocol
/// streams, without any peer-side services of its own.
struct OverlayClient {
    control: Control,
    network: NetworkHandle,
}

impl OverlayClient {
    fn spawn() -> Self {
        let keypair = libp2p::identity::Keypair::generate_ed25519();
        let config = HostConfig {
            local_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            public_addr: format!("/ip4/127.0.0.1/tcp/{}", free_port()).parse().unwrap(),
            enable_relay: false,
        };
        let (swarm, _peer_id, streams) = build_swarm(keypair, &config).expect("client swarm");
        let (driver, network) = SwarmDriver::new(swarm);
        tokio::spawn(driver.run());
        Self {
            control: streams.control,
            network,
        }
    }

    /// Run the relay registration handshake against `target`, claiming
    /// `agent_addr` on behalf of `owner_peer_id`.
    async fn register_relay(
        &self,
        target: (PeerId, Multiaddr),
        agent_addr: &str,
        owner_peer_id: &str,
    ) -> anyhow::Result<()> {
        self.network.dial(target.0, target.1).await?;

        let mut control = self.control.clone();
        let mut stream = control.open_stream(target.0, REGISTER_RELAY_PROTOCOL).await?;

        write_bytes(&mut stream, agent_addr.as_bytes()).await?;
        let ack = read_bytes(&mut stream).await?;
        ensure!(ack == b"doneAddress", "unexpected ack: {:?}", ack);

        write_bytes(&mut stream, owner_peer_id.as_bytes()).await?;
        let ack = read_bytes(&mut stream).await?;
        ensure!(ack == b"donePeerID", "unexpected ack: {:?}", ack);

        stream.close().await?;
        Ok(())
    }

    /// Query `target` for the peer hosting `agent_addr`.
    async fn lookup_address(
        &self,
        target: (PeerId, Multiaddr),
        agent_addr: &str,
    ) -> anyhow::Result<String> {
        self.network.dial(target.0, target.1).await?;

        let mut control = self.control.clone();
        let mut stream = control.open_stream(target.0, ADDRESS_PROTOCOL).await?;

        write_bytes(&mut stream, agent_addr.as_bytes()).await?;
        let peer_id = read_string(&mut stream).await?;
        let _ = stream.close().await;
        Ok(peer_id)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_relay_routing_without_lookup() {
    acn_logging::init_test();

    let mut config1 = loopback_config();
    config1.enable_relay = true;
    let peer1 = AcnPeer::new(config1).await.expect("peer1 should start");

    let (process, mut agent_rx) = agent_channel();
    let mut config2 = loopback_config();
    config2.my_agent_address = Some("agent_relayed".to_string());
    config2.process_envelope = Some(process);
    config2.bootstrap_peers = vec![bootstrap_entry(&peer1)];
    let peer2 = AcnPeer::new(config2).await.expect("peer2 should start");

    // A relay client claims peer2's agent address: envelopes must go
    // straight to the stored peer id.
    let client = OverlayClient::spawn();
    client
        .register_relay(
            bootstrap_entry(&peer1),
            "agent_relayed",
            &peer2.peer_id().to_string(),
        )
        .await
        .expect("relay registration should complete");

    let envelope = sample_envelope("agent_relayed", "agent_other");
    timeout(Duration::from_secs(15), peer1.route(envelope.clone()))
        .await
        .expect("routing should finish in time")
        .expect("routing should succeed");

    let received = timeout(Duration::from_secs(10), agent_rx.recv())
        .await
        .expect("peer2's agent should receive the envelope")
        .expect("agent channel should stay open");
    assert_eq!(received, envelope);

    peer1.close().await;
    peer2.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_address_lookup_answers_gateway_for_delegates() {
    acn_logging::init_test();

    let mut config = loopback_config();
    config.delegate_port = free_port();
    let delegate_port = config.delegate_port;
    let peer = AcnPeer::new(config).await.expect("peer should start");

    let _delegate = common::DelegateClient::connect(delegate_port, "agent_behind_gateway")
        .await
        .expect("delegate handshake");

    // Delegate clients have no peer id of their own; the lookup must
    // answer with the gateway's.
    let client = OverlayClient::spawn();
    let resolved = timeout(
        Duration::from_secs(15),
        client.lookup_address(bootstrap_entry(&peer), "agent_behind_gateway"),
    )
    .await
    .expect("lookup should finish in time")
    .expect("lookup should succeed");

    assert_eq!(resolved, peer.peer_id().to_string());

    peer.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cross_node_lookup_and_delivery() {
    acn_logging::init_test();

    let mut config1 = loopback_config();
    config1.enable_relay = true;
    config1.delegate_port = free_port();
    let delegate_port = config1.delegate_port;
    let peer1 = AcnPeer::new(config1).await.expect("peer1 should start");

    let mut delegate = common::DelegateClient::connect(delegate_port, "agent_far")
        .await
        .expect("delegate handshake");

    let mut config2 = loopback_config();
    config2.bootstrap_peers = vec![bootstrap_entry(&peer1)];
    let peer2 = AcnPeer::new(config2).await.expect("peer2 should start");

    // peer2's join notification makes peer1 publish its delegate
    // client's address.
    assert!(
        wait_for_announced(&peer1, Duration::from_secs(10)).await,
        "peer1 should announce after being notified"
    );

    let envelope = sample_envelope("agent_far", "agent_near");
    timeout(Duration::from_secs(30), peer2.route(envelope.clone()))
        .await
        .expect("routing should finish in time")
        .expect("routing should succeed");

    let received = timeout(Duration::from_secs(10), delegate.recv())
        .await
        .expect("delegate should receive the envelope")
        .expect("read should succeed");
    assert_eq!(received, envelope);

    peer1.close().await;
    peer2.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_announcement_is_idempotent() {
    acn_logging::init_test();

    let config1 = loopback_config();
    let peer1 = AcnPeer::new(config1).await.expect("peer1 should start");

    let mut config2 = loopback_config();
    config2.my_agent_address = Some("agent_idem".to_string());
    config2.bootstrap_peers = vec![bootstrap_entry(&peer1)];
    let peer2 = AcnPeer::new(config2).await.expect("peer2 should start");
    assert!(peer2.announced(), "joining a network announces immediately");

    // Re-announcing the same address must succeed, including while a
    // previous publication may still be in flight.
    let (first, second) = tokio::join!(
        peer2.register_agent_address("agent_extra"),
        peer2.register_agent_address("agent_extra"),
    );
    first.expect("first announcement should succeed");
    second.expect("second announcement should succeed");

    peer2
        .register_agent_address("agent_extra")
        .await
        .expect("repeated announcement should succeed");

    peer1.close().await;
    peer2.close().await;
}
