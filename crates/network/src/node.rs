//! Swarm construction for ACN peer nodes.

use libp2p::{identity::Keypair, noise, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder};
use thiserror::Error;
use tracing::info;

use crate::behaviour::AcnBehaviour;
use crate::protocol::{
    ADDRESS_PROTOCOL, ENVELOPE_PROTOCOL, NOTIFY_PROTOCOL, REGISTER_RELAY_PROTOCOL,
};

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Swarm build error: {0}")]
    SwarmBuild(String),

    #[error("Listen error: {0}")]
    Listen(String),

    #[error("Dial error: {0}")]
    Dial(String),

    #[error("DHT error: {0}")]
    Dht(String),

    #[error("Network driver stopped")]
    ChannelClosed,
}

/// Host addressing configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address the transport binds locally
    pub local_addr: Multiaddr,
    /// Address advertised to the rest of the network. Advertised
    /// exclusively: the local binding is never announced.
    pub public_addr: Multiaddr,
    /// Whether the relay registration protocol is served
    pub enable_relay: bool,
}

/// Stream plumbing handed to the peer: one control for outbound opens and
/// one inbound acceptor per served protocol.
pub struct AcnStreams {
    pub control: libp2p_stream::Control,
    /// Present only when relay service is enabled
    pub register: Option<libp2p_stream::IncomingStreams>,
    pub address: libp2p_stream::IncomingStreams,
    pub envelope: libp2p_stream::IncomingStreams,
    pub notify: libp2p_stream::IncomingStreams,
}

/// Build the ACN swarm: TCP transport with noise + yamux, combined
/// behaviour, listening on the local address and advertising the public one.
///
/// All inbound protocols are accepted here, BEFORE any connection exists.
/// `listen_protocol()` on the connection handler captures the supported
/// inbound protocols at handler-creation time; accepting later would make
/// established connections silently drop our streams.
pub fn build_swarm(
    keypair: Keypair,
    config: &HostConfig,
) -> Result<(Swarm<AcnBehaviour>, PeerId, AcnStreams), NetworkError> {
    let local_peer_id = PeerId::from(keypair.public());

    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| NetworkError::SwarmBuild(e.to_string()))?
        .with_behaviour(|key| AcnBehaviour::new(local_peer_id, key))
        .map_err(|e| NetworkError::SwarmBuild(e.to_string()))?
        .build();

    let control = swarm.behaviour().stream.new_control();
    let accept = |control: &mut libp2p_stream::Control, protocol| {
        control
            .accept(protocol)
            .map_err(|e| NetworkError::SwarmBuild(e.to_string()))
    };

    let mut acceptor = control.clone();
    let register = if config.enable_relay {
        Some(accept(&mut acceptor, REGISTER_RELAY_PROTOCOL)?)
    } else {
        None
    };
    let address = accept(&mut acceptor, ADDRESS_PROTOCOL)?;
    let envelope = accept(&mut acceptor, ENVELOPE_PROTOCOL)?;
    let notify = accept(&mut acceptor, NOTIFY_PROTOCOL)?;

    swarm
        .listen_on(config.local_addr.clone())
        .map_err(|e| NetworkError::Listen(e.to_string()))?;
    swarm.add_external_address(config.public_addr.clone());

    info!(peer_id = %local_peer_id, public = %config.public_addr, "ACN swarm built");

    let streams = AcnStreams {
        control,
        register,
        address,
        envelope,
        notify,
    };

    Ok((swarm, local_peer_id, streams))
}
