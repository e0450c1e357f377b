//! DHT-backed agent address resolution and publication.

use std::time::Duration;

use libp2p::PeerId;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use acn_codec::{read_string, write_bytes};
use acn_core::compute_cid;
use acn_network::ADDRESS_PROTOCOL;
use futures::AsyncWriteExt;

use crate::peer::PeerInner;
use crate::{PeerError, ADDRESS_LOOKUP_TIMEOUT, ADDRESS_REGISTER_TIMEOUT, NEW_STREAM_TIMEOUT};

/// Pause between provider-search rounds while the deadline allows retries.
const PROVIDER_RETRY_DELAY: Duration = Duration::from_millis(200);

impl PeerInner {
    /// Resolve an agent address through the DHT.
    ///
    /// Finds a provider for the address CID, then asks that provider over
    /// the address protocol which peer hosts the address. The two steps are
    /// distinct: a provider guarantees someone who *knows*, not necessarily
    /// the hosting peer itself (delegate clients are advertised by their
    /// gateway node).
    pub(crate) async fn lookup_address_dht(&self, address: &str) -> Result<PeerId, PeerError> {
        let cid = compute_cid(address);
        debug!(addr = address, cid = %cid, "querying providers");
        let started = Instant::now();

        let provider = timeout(ADDRESS_LOOKUP_TIMEOUT, async {
            loop {
                let mut providers = self.network.find_providers(cid.to_record_key()).await?;
                if let Some(provider) = providers.pop() {
                    return Ok::<PeerId, PeerError>(provider);
                }
                debug!(addr = address, "no provider found yet, retrying");
                sleep(PROVIDER_RETRY_DELAY).await;
            }
        })
        .await
        .map_err(|_| PeerError::NoProvider(address.to_string()))??;

        debug!(
            addr = address,
            provider = %provider,
            elapsed = ?started.elapsed(),
            "found provider, asking for the hosting peer id"
        );

        let mut control = self.control.clone();
        let mut stream = timeout(NEW_STREAM_TIMEOUT, control.open_stream(provider, ADDRESS_PROTOCOL))
            .await
            .map_err(|_| PeerError::Timeout("stream open"))?
            .map_err(|e| PeerError::Stream(e.to_string()))?;

        let exchange = async {
            write_bytes(&mut stream, address.as_bytes()).await?;
            let peer_id = read_string(&mut stream).await?;
            Ok::<String, PeerError>(peer_id)
        }
        .await;

        match exchange {
            Ok(peer_id) => {
                let _ = stream.close().await;
                peer_id
                    .parse()
                    .map_err(|_| PeerError::InvalidPeerId(peer_id))
            }
            Err(e) => {
                // Dropping the stream without a close resets it.
                drop(stream);
                Err(e)
            }
        }
    }

    /// Publish this node as provider for an agent address.
    ///
    /// The publication keeps propagating in the background once issued, so
    /// running into the register deadline is not a failure; repeating the
    /// call for the same address is safe.
    pub(crate) async fn register_agent_address(&self, address: &str) -> Result<(), PeerError> {
        let cid = compute_cid(address);
        debug!(addr = address, cid = %cid, "announcing address to the DHT");

        match timeout(
            ADDRESS_REGISTER_TIMEOUT,
            self.network.start_providing(cid.to_record_key()),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => {
                debug!(addr = address, "address announcement still in flight at deadline");
                Ok(())
            }
        }
    }
}
