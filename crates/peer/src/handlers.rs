//! Inbound overlay-stream handlers.
//!
//! One accept loop per served protocol; every accepted stream is handled on
//! its own task. Handler failures are logged and reset the offending
//! stream, never the node.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::{AsyncWriteExt, StreamExt};
use libp2p::{PeerId, Stream};
use libp2p_stream::IncomingStreams;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use acn_codec::{read_envelope, read_string, write_bytes};

use crate::peer::PeerInner;
use crate::{ROUTING_TABLE_POLL_INTERVAL, ROUTING_TABLE_UPDATE_TIMEOUT};

impl PeerInner {
    pub(crate) async fn run_register_handler(self: Arc<Self>, mut streams: IncomingStreams) {
        while let Some((peer, stream)) = streams.next().await {
            debug!(peer = %peer, "new relay registration stream");
            let inner = self.clone();
            tokio::spawn(async move { inner.handle_register_stream(stream).await });
        }
    }

    pub(crate) async fn run_address_handler(self: Arc<Self>, mut streams: IncomingStreams) {
        while let Some((peer, stream)) = streams.next().await {
            debug!(peer = %peer, "new address lookup stream");
            let inner = self.clone();
            tokio::spawn(async move { inner.handle_address_stream(stream).await });
        }
    }

    pub(crate) async fn run_envelope_handler(self: Arc<Self>, mut streams: IncomingStreams) {
        while let Some((peer, stream)) = streams.next().await {
            debug!(peer = %peer, "new envelope stream");
            let inner = self.clone();
            tokio::spawn(async move { inner.handle_envelope_stream(stream).await });
        }
    }

    pub(crate) async fn run_notify_handler(self: Arc<Self>, mut streams: IncomingStreams) {
        while let Some((peer, stream)) = streams.next().await {
            let inner = self.clone();
            tokio::spawn(async move { inner.handle_notify_stream(peer, stream).await });
        }
    }

    /// Relay registration: address in, `"doneAddress"` out, peer id in,
    /// `"donePeerID"` out. The two acks serialize the handshake so the
    /// client can detect partial failure.
    async fn handle_register_stream(&self, mut stream: Stream) {
        let client_addr = match read_string(&mut stream).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%e, "while reading client address from registration stream");
                return;
            }
        };
        if let Err(e) = write_bytes(&mut stream, b"doneAddress").await {
            debug!(%e, "ignored ack write failure");
        }

        let client_peer_id = match read_string(&mut stream).await {
            Ok(peer_id) => peer_id,
            Err(e) => {
                warn!(addr = %client_addr, %e, "while reading client peer id from registration stream");
                return;
            }
        };
        if let Err(e) = write_bytes(&mut stream, b"donePeerID").await {
            debug!(%e, "ignored ack write failure");
        }

        info!(addr = %client_addr, peer = %client_peer_id, "registered relay client address");
        self.table.put_relay(client_addr.clone(), client_peer_id);

        if self.announced.load(Ordering::SeqCst) {
            info!(addr = %client_addr, "announcing relay client address");
            if let Err(e) = self.register_agent_address(&client_addr).await {
                error!(addr = %client_addr, %e, "while announcing relay client address");
                drop(stream);
                return;
            }
        }

        let _ = stream.close().await;
    }

    /// Address lookup: one framed address in, one framed peer-id string
    /// back. Unresolvable addresses reset the stream.
    async fn handle_address_stream(&self, mut stream: Stream) {
        let requested = match read_string(&mut stream).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(%e, "while reading address from lookup stream");
                return;
            }
        };
        debug!(addr = %requested, "received query for address");

        let Some(peer_id) = self.resolve_address(&requested).await else {
            warn!(addr = %requested, "did not find address locally or on the DHT");
            return;
        };

        debug!(addr = %requested, peer = %peer_id, "answering address query");
        if let Err(e) = write_bytes(&mut stream, peer_id.as_bytes()).await {
            error!(addr = %requested, %e, "while sending peer id to querier");
            return;
        }
        let _ = stream.close().await;
    }

    async fn resolve_address(&self, addr: &str) -> Option<String> {
        if self.my_agent_address.as_deref() == Some(addr) {
            return Some(self.local_peer_id.to_string());
        }
        if let Some(peer_id) = self.table.get_relay(addr) {
            debug!(addr, "found address in relay clients map");
            return Some(peer_id);
        }
        if self.table.get_delegate(addr).is_some() {
            // Delegate clients have no overlay presence of their own;
            // this node is their gateway.
            debug!(addr, "found address in delegate clients map");
            return Some(self.local_peer_id.to_string());
        }
        match self.lookup_address_dht(addr).await {
            Ok(peer) => Some(peer.to_string()),
            Err(e) => {
                debug!(addr, %e, "DHT lookup failed");
                None
            }
        }
    }

    /// Envelope delivery: read one envelope, close, dispatch to a delegate
    /// client or the local agent. Errors are logged, not propagated.
    async fn handle_envelope_stream(&self, mut stream: Stream) {
        let envelope = match read_envelope(&mut stream).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%e, "while reading envelope from stream");
                return;
            }
        };
        let _ = stream.close().await;
        debug!(%envelope, "received envelope from peer");

        if let Some(conn) = self.table.get_delegate(&envelope.to) {
            debug!(remote = %conn.remote_addr(), "sending envelope to delegate client");
            if let Err(e) = conn.send_envelope(&envelope).await {
                error!(remote = %conn.remote_addr(), %e, "while sending envelope to delegate client");
            }
            return;
        }

        match &self.process_envelope {
            Some(process) if self.my_agent_address.as_deref() == Some(envelope.to.as_str()) => {
                debug!("processing envelope by local agent");
                if let Err(e) = process(envelope) {
                    error!(%e, "while processing envelope by agent");
                }
            }
            _ => warn!(%envelope, "ignored envelope"),
        }
    }

    /// Peer-join notification. On the first notification, wait for the
    /// notifying peer to show up in the Kademlia routing table (a Provide
    /// issued straight after connecting can fail against an empty table),
    /// then publish every address this node is responsible for.
    async fn handle_notify_stream(&self, remote: PeerId, stream: Stream) {
        info!(peer = %remote, "received peer-join notification");

        if !self.announced.load(Ordering::SeqCst) {
            debug!(peer = %remote, "waiting for notifying peer to enter the routing table");
            let deadline = Instant::now() + ROUTING_TABLE_UPDATE_TIMEOUT;
            loop {
                match self.network.in_routing_table(remote).await {
                    Ok(true) => break,
                    Ok(false) => {
                        if Instant::now() >= deadline {
                            error!(peer = %remote, "notifying peer never entered the routing table");
                            return;
                        }
                        sleep(ROUTING_TABLE_POLL_INTERVAL).await;
                    }
                    Err(e) => {
                        error!(%e, "routing table probe failed");
                        return;
                    }
                }
            }

            if let Some(my_addr) = &self.my_agent_address {
                if let Err(e) = self.register_agent_address(my_addr).await {
                    error!(addr = %my_addr, %e, "while announcing my agent address");
                    return;
                }
            }
            if self.enable_relay {
                for addr in self.table.relay_addrs() {
                    if let Err(e) = self.register_agent_address(&addr).await {
                        error!(addr = %addr, %e, "while announcing relay client address");
                    }
                }
            }
            if self.delegate_port != 0 {
                for addr in self.table.delegate_addrs() {
                    if let Err(e) = self.register_agent_address(&addr).await {
                        error!(addr = %addr, %e, "while announcing delegate client address");
                    }
                }
            }
        }

        self.announced.store(true, Ordering::SeqCst);
        let _ = stream;
    }
}
