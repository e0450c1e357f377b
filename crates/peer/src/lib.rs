//! ACN Peer
//!
//! A full node for the Agent Communication Network: a Kademlia
//! participant that locates agent addresses across the network, maintains
//! routing state for attached relay and delegate clients, and forwards
//! envelopes to the peer currently hosting the destination agent.
//!
//! Construction, routing and shutdown are driven through [`AcnPeer`];
//! everything else runs on background tasks.

use std::time::Duration;

mod config;
mod delegate;
mod error;
mod handlers;
mod lookup;
mod peer;
mod router;
mod routing;

pub use config::{AgentReadyFn, PeerConfig, ProcessEnvelopeFn};
pub use error::PeerError;
pub use peer::AcnPeer;
pub use routing::{DelegateConnection, RouteTarget, RoutingTable};

pub use acn_core::{compute_cid, AddressCid, Envelope};

/// Overall deadline for resolving an address through the DHT.
pub const ADDRESS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(20);

/// How long the notify handler waits for a new peer to show up in the
/// Kademlia routing table before giving up on publication.
pub const ROUTING_TABLE_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for opening a new overlay stream.
pub const NEW_STREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for one address publication; hitting it is tolerated, the
/// record keeps propagating in the background.
pub const ADDRESS_REGISTER_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) const ROUTING_TABLE_POLL_INTERVAL: Duration = Duration::from_millis(5);
