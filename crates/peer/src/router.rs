//! Envelope routing.
//!
//! One decision point for every outbound or transiting envelope: local
//! agent, delegate connection, known relay client, or a remote peer found
//! through the DHT.

use std::time::Duration;

use libp2p::PeerId;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, warn};

use acn_codec::write_envelope;
use acn_core::Envelope;
use acn_network::ENVELOPE_PROTOCOL;
use futures::AsyncWriteExt;

use crate::peer::PeerInner;
use crate::routing::RouteTarget;
use crate::{PeerError, NEW_STREAM_TIMEOUT};

const AGENT_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl PeerInner {
    /// Route an envelope to its destination.
    pub(crate) async fn route_envelope(&self, envelope: Envelope) -> Result<(), PeerError> {
        match self.table.classify(&envelope.to, self.my_agent_address.as_deref()) {
            RouteTarget::Local => {
                debug!(addr = %envelope.to, "routing envelope to my local agent");
                self.deliver_local(envelope).await
            }
            RouteTarget::Delegate(conn) => {
                debug!(
                    addr = %envelope.to,
                    remote = %conn.remote_addr(),
                    "destination is a delegate client"
                );
                conn.send_envelope(&envelope).await.map_err(PeerError::from)
            }
            RouteTarget::Relay(peer_id) => {
                debug!(addr = %envelope.to, peer = %peer_id, "destination is a relay client");
                let peer: PeerId = peer_id.parse().map_err(|_| {
                    error!(addr = %envelope.to, "stored relay client peer id does not parse");
                    PeerError::InvalidPeerId(peer_id.clone())
                })?;
                self.send_envelope_stream(peer, &envelope).await
            }
            RouteTarget::Remote => {
                debug!(addr = %envelope.to, "destination unknown locally, querying the DHT");
                let peer = self.lookup_address_dht(&envelope.to).await?;
                self.send_envelope_stream(peer, &envelope).await
            }
        }
    }

    async fn deliver_local(&self, envelope: Envelope) -> Result<(), PeerError> {
        if let Some(ready) = &self.agent_ready {
            // The wait for the local agent is bounded by the same
            // deadline a remote delivery would get for its stream open.
            let deadline = Instant::now() + NEW_STREAM_TIMEOUT;
            while !ready() {
                if Instant::now() >= deadline {
                    return Err(PeerError::Timeout("local agent readiness"));
                }
                debug!("local agent not ready yet, waiting");
                sleep(AGENT_READY_POLL_INTERVAL).await;
            }
        }

        match &self.process_envelope {
            Some(process) => process(envelope).map_err(|e| PeerError::Agent(e.to_string())),
            None => {
                warn!(%envelope, "no envelope consumer installed, dropping");
                Ok(())
            }
        }
    }

    /// Deliver an envelope to a remote peer over a fresh envelope stream.
    pub(crate) async fn send_envelope_stream(
        &self,
        peer: PeerId,
        envelope: &Envelope,
    ) -> Result<(), PeerError> {
        debug!(peer = %peer, addr = %envelope.to, "opening stream to destination peer");
        let mut control = self.control.clone();
        let mut stream = timeout(NEW_STREAM_TIMEOUT, control.open_stream(peer, ENVELOPE_PROTOCOL))
            .await
            .map_err(|_| PeerError::Timeout("stream open"))?
            .map_err(|e| PeerError::Stream(e.to_string()))?;

        match write_envelope(&mut stream, envelope).await {
            Ok(()) => {
                let _ = stream.close().await;
                Ok(())
            }
            Err(e) => {
                drop(stream);
                Err(e.into())
            }
        }
    }
}
