//! ACN overlay wire protocols
//!
//! The four stream protocol identifiers spoken between peers. The exact
//! bytes are part of the wire contract; changing any of them partitions
//! the network.

use libp2p::StreamProtocol;

/// Relay clients register their agent addresses over this protocol.
///
/// Handshake, server side: read address, ack `"doneAddress"`, read the
/// client's peer id, ack `"donePeerID"`.
pub const REGISTER_RELAY_PROTOCOL: StreamProtocol =
    StreamProtocol::new("/aea-register-relay/0.1.0");

/// Agent-address to peer-id lookup. One framed address in, one framed
/// peer-id string back.
pub const ADDRESS_PROTOCOL: StreamProtocol = StreamProtocol::new("/aea-address/0.1.0");

/// Envelope delivery. One framed envelope per stream.
pub const ENVELOPE_PROTOCOL: StreamProtocol = StreamProtocol::new("/aea/0.1.0");

/// Peer-join notification, opened towards bootstrap peers so they can
/// (re)publish their addresses.
pub const NOTIFY_PROTOCOL: StreamProtocol = StreamProtocol::new("/aea-notif/0.1.0");
