use std::sync::Arc;

use libp2p::{identity::Keypair, Multiaddr, PeerId};

use acn_core::Envelope;

/// Returns true once the local agent is able to consume envelopes.
pub type AgentReadyFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Hands a delivered envelope to the local agent.
pub type ProcessEnvelopeFn =
    Arc<dyn Fn(Envelope) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Configuration for an [`AcnPeer`](crate::AcnPeer).
///
/// `keypair`, `local_addr` and `public_addr` are mandatory; construction
/// fails without them. Everything else is optional.
#[derive(Clone, Default)]
pub struct PeerConfig {
    /// Node identity. The peer id is derived from its public key.
    pub keypair: Option<Keypair>,

    /// Address the transport binds locally.
    pub local_addr: Option<Multiaddr>,

    /// Address advertised to the network, regardless of local bindings.
    pub public_addr: Option<Multiaddr>,

    /// TCP port for the delegate service; 0 disables it.
    pub delegate_port: u16,

    /// Peers of an existing network to join through.
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,

    /// Serve the relay registration protocol.
    pub enable_relay: bool,

    /// Address of the agent hosted on this node, if any.
    pub my_agent_address: Option<String>,

    /// Local agent readiness probe.
    pub agent_ready: Option<AgentReadyFn>,

    /// Local agent envelope consumer.
    pub process_envelope: Option<ProcessEnvelopeFn>,
}

impl PeerConfig {
    /// Config with the three mandatory fields set.
    pub fn new(keypair: Keypair, local_addr: Multiaddr, public_addr: Multiaddr) -> Self {
        Self {
            keypair: Some(keypair),
            local_addr: Some(local_addr),
            public_addr: Some(public_addr),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConfig")
            .field("local_addr", &self.local_addr)
            .field("public_addr", &self.public_addr)
            .field("delegate_port", &self.delegate_port)
            .field("bootstrap_peers", &self.bootstrap_peers)
            .field("enable_relay", &self.enable_relay)
            .field("my_agent_address", &self.my_agent_address)
            .field("agent_ready", &self.agent_ready.is_some())
            .field("process_envelope", &self.process_envelope.is_some())
            .finish()
    }
}
