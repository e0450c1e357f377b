//! Bootstrap peer parsing.
//!
//! Entry points into an existing ACN are handed to a node as full
//! multiaddrs of the form `/ip4/<IP>/tcp/<PORT>/p2p/<PEER_ID>`.

use libp2p::{Multiaddr, PeerId};

/// Parse a list of bootstrap multiaddr strings, dropping malformed entries.
pub fn parse_bootstrap_nodes(addrs: &[impl AsRef<str>]) -> Vec<(PeerId, Multiaddr)> {
    addrs
        .iter()
        .filter_map(|addr_str| parse_bootstrap_addr(addr_str.as_ref()))
        .collect()
}

/// Parse a single bootstrap address.
///
/// Expected format: /ip4/<IP>/tcp/<PORT>/p2p/<PEER_ID>
pub fn parse_bootstrap_addr(addr_str: &str) -> Option<(PeerId, Multiaddr)> {
    let addr: Multiaddr = addr_str.parse().ok()?;

    let peer_id = addr.iter().find_map(|proto| {
        if let libp2p::multiaddr::Protocol::P2p(peer_id) = proto {
            Some(peer_id)
        } else {
            None
        }
    })?;

    // Strip /p2p/<peer_id> for dialing
    let dial_addr: Multiaddr = addr
        .iter()
        .filter(|proto| !matches!(proto, libp2p::multiaddr::Protocol::P2p(_)))
        .collect();

    Some((peer_id, dial_addr))
}

/// Render a bootstrap multiaddr string from components.
pub fn make_bootstrap_addr(ip: &str, port: u16, peer_id: &PeerId) -> String {
    format!("/ip4/{}/tcp/{}/p2p/{}", ip, port, peer_id)
}
