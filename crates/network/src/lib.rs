//! ACN Network
//!
//! libp2p integration for ACN peer nodes: the combined behaviour
//! (Kademlia DHT, identify, circuit-relay hop service, ad-hoc streams),
//! swarm construction, the command-driven swarm driver, and bootstrap
//! address parsing.

mod behaviour;
mod bootstrap;
mod driver;
mod protocol;
mod node;

pub use behaviour::{AcnBehaviour, AcnBehaviourEvent, IDENTIFY_PROTOCOL, KADEMLIA_PROTOCOL};
pub use bootstrap::{make_bootstrap_addr, parse_bootstrap_addr, parse_bootstrap_nodes};
pub use driver::{NetworkHandle, SwarmDriver};
pub use node::{build_swarm, AcnStreams, HostConfig, NetworkError};
pub use protocol::{
    ADDRESS_PROTOCOL, ENVELOPE_PROTOCOL, NOTIFY_PROTOCOL, REGISTER_RELAY_PROTOCOL,
};

// Re-export commonly used libp2p types
pub use libp2p::{Multiaddr, PeerId};
pub use libp2p_stream::{Control, IncomingStreams};
