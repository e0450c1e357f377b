//! Network behaviour for ACN peers
//!
//! Combines the Kademlia DHT (server mode), identify, circuit-relay hop
//! service, and the ad-hoc stream transport the four ACN protocols run on.

use std::time::Duration;

use libp2p::{identify, kad, relay, swarm::NetworkBehaviour, PeerId, StreamProtocol};

/// Kademlia protocol name
pub const KADEMLIA_PROTOCOL: StreamProtocol = StreamProtocol::new("/acn/kad/1.0.0");

/// Identify protocol name
pub const IDENTIFY_PROTOCOL: &str = "/acn/id/1.0.0";

/// Per-query Kademlia timeout. Kept well below the 20 s address-lookup
/// deadline so an empty round leaves room for retries.
pub const KADEMLIA_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Combined network behaviour for ACN peer nodes
#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "AcnBehaviourEvent")]
pub struct AcnBehaviour {
    /// Kademlia DHT indexing agent-address providers
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    /// Identify protocol for peer info exchange
    pub identify: identify::Behaviour,
    /// Circuit-relay hop service for relay clients
    pub relay: relay::Behaviour,
    /// Ad-hoc bidirectional streams for the ACN wire protocols
    pub stream: libp2p_stream::Behaviour,
}

/// Events emitted by the ACN behaviour
#[derive(Debug)]
pub enum AcnBehaviourEvent {
    Kademlia(kad::Event),
    Identify(identify::Event),
    Relay(relay::Event),
    Stream(()),
}

impl From<kad::Event> for AcnBehaviourEvent {
    fn from(e: kad::Event) -> Self {
        AcnBehaviourEvent::Kademlia(e)
    }
}

impl From<identify::Event> for AcnBehaviourEvent {
    fn from(e: identify::Event) -> Self {
        AcnBehaviourEvent::Identify(e)
    }
}

impl From<relay::Event> for AcnBehaviourEvent {
    fn from(e: relay::Event) -> Self {
        AcnBehaviourEvent::Relay(e)
    }
}

impl From<()> for AcnBehaviourEvent {
    fn from(e: ()) -> Self {
        AcnBehaviourEvent::Stream(e)
    }
}

impl AcnBehaviour {
    /// Create a new ACN behaviour
    pub fn new(local_peer_id: PeerId, keypair: &libp2p::identity::Keypair) -> Self {
        // Kademlia in server mode: every peer stores provider records and
        // answers queries.
        let mut kad_config = kad::Config::new(KADEMLIA_PROTOCOL);
        kad_config.set_query_timeout(KADEMLIA_QUERY_TIMEOUT);

        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        kademlia.set_mode(Some(kad::Mode::Server));

        let identify_config = identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
            .with_agent_version(format!("acn/{}", env!("CARGO_PKG_VERSION")));
        let identify = identify::Behaviour::new(identify_config);

        let relay = relay::Behaviour::new(local_peer_id, relay::Config::default());

        let stream = libp2p_stream::Behaviour::new();

        Self {
            kademlia,
            identify,
            relay,
            stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    #[test]
    fn test_kademlia_protocol() {
        assert_eq!(KADEMLIA_PROTOCOL.as_ref(), "/acn/kad/1.0.0");
    }

    #[test]
    fn test_behaviour_creation() {
        let keypair = Keypair::generate_ed25519();
        let peer_id = PeerId::from(keypair.public());
        let behaviour = AcnBehaviour::new(peer_id, &keypair);

        let _ = &behaviour.kademlia;
        let _ = &behaviour.identify;
        let _ = &behaviour.relay;
        let _ = &behaviour.stream;
    }

    #[test]
    fn test_event_from_kad() {
        fn _check_from(e: kad::Event) -> AcnBehaviourEvent {
            e.into()
        }
    }

    #[test]
    fn test_event_from_identify() {
        fn _check_from(e: identify::Event) -> AcnBehaviourEvent {
            e.into()
        }
    }

    #[test]
    fn test_event_from_relay() {
        fn _check_from(e: relay::Event) -> AcnBehaviourEvent {
            e.into()
        }
    }
}
