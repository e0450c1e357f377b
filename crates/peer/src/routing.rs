//! In-memory routing state.
//!
//! Two maps keyed by agent address: relay clients (owning peer id) and
//! delegate clients (live TCP connection). Access is serialized by a single
//! mutex held only for map operations, never across an await point; readers
//! clone the entry out and work on the clone.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::compat::Compat;

use acn_codec::{write_bytes, write_envelope, CodecError};
use acn_core::Envelope;

/// Write side of a delegate TCP connection, shareable with the router.
///
/// The read side stays with the connection's read loop, which is the sole
/// owner of the map entry: it inserts on handshake and removes on exit.
#[derive(Clone)]
pub struct DelegateConnection {
    writer: Arc<tokio::sync::Mutex<Compat<OwnedWriteHalf>>>,
    remote: SocketAddr,
}

impl DelegateConnection {
    pub fn new(writer: Compat<OwnedWriteHalf>, remote: SocketAddr) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            remote,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        write_envelope(&mut *writer, envelope).await
    }

    pub async fn send_bytes(&self, data: &[u8]) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        write_bytes(&mut *writer, data).await
    }

    /// Half-close towards the client; its next read returns EOF.
    pub async fn shutdown(&self) -> Result<(), std::io::Error> {
        let mut writer = self.writer.lock().await;
        writer.close().await
    }

    fn same_connection(&self, other: &DelegateConnection) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }
}

impl std::fmt::Debug for DelegateConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateConnection")
            .field("remote", &self.remote)
            .finish()
    }
}

/// Destination class of an envelope, resolved in one place.
#[derive(Debug)]
pub enum RouteTarget {
    /// The agent hosted on this node
    Local,
    /// A delegate client attached over TCP
    Delegate(DelegateConnection),
    /// A relay client; the stored peer id string is used directly
    Relay(String),
    /// Unknown locally; resolve through the DHT
    Remote,
}

#[derive(Default)]
struct Tables {
    relay_clients: HashMap<String, String>,
    delegate_clients: HashMap<String, DelegateConnection>,
}

/// Shared routing table. Duplicate registrations are client misuse; the
/// last writer wins.
#[derive(Default)]
pub struct RoutingTable {
    inner: Mutex<Tables>,
}

impl RoutingTable {
    pub fn get_relay(&self, addr: &str) -> Option<String> {
        self.inner.lock().unwrap().relay_clients.get(addr).cloned()
    }

    pub fn put_relay(&self, addr: String, peer_id: String) {
        self.inner.lock().unwrap().relay_clients.insert(addr, peer_id);
    }

    pub fn get_delegate(&self, addr: &str) -> Option<DelegateConnection> {
        self.inner.lock().unwrap().delegate_clients.get(addr).cloned()
    }

    pub fn put_delegate(&self, addr: String, conn: DelegateConnection) {
        self.inner.lock().unwrap().delegate_clients.insert(addr, conn);
    }

    /// Remove `addr` only while it still maps to `conn`. A reconnect under
    /// the same address replaces the entry, and the old read loop must not
    /// tear down its successor.
    pub fn remove_delegate(&self, addr: &str, conn: &DelegateConnection) {
        let mut tables = self.inner.lock().unwrap();
        if let Some(current) = tables.delegate_clients.get(addr) {
            if current.same_connection(conn) {
                tables.delegate_clients.remove(addr);
            }
        }
    }

    pub fn relay_addrs(&self) -> Vec<String> {
        self.inner.lock().unwrap().relay_clients.keys().cloned().collect()
    }

    pub fn delegate_addrs(&self) -> Vec<String> {
        self.inner.lock().unwrap().delegate_clients.keys().cloned().collect()
    }

    /// Remove and return every delegate connection (shutdown path).
    pub fn drain_delegates(&self) -> Vec<(String, DelegateConnection)> {
        self.inner.lock().unwrap().delegate_clients.drain().collect()
    }

    /// Classify a destination address. The order is part of the routing
    /// contract: local agent, then delegate clients, then relay clients,
    /// then the DHT.
    pub fn classify(&self, to: &str, my_agent_address: Option<&str>) -> RouteTarget {
        if Some(to) == my_agent_address {
            return RouteTarget::Local;
        }
        let tables = self.inner.lock().unwrap();
        if let Some(conn) = tables.delegate_clients.get(to) {
            return RouteTarget::Delegate(conn.clone());
        }
        if let Some(peer_id) = tables.relay_clients.get(to) {
            return RouteTarget::Relay(peer_id.clone());
        }
        RouteTarget::Remote
    }
}
