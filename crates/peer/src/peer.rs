//! Peer lifecycle: construction, bootstrap join, shutdown.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::AsyncWriteExt;
use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use libp2p_stream::Control;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use acn_core::Envelope;
use acn_network::{build_swarm, HostConfig, NetworkHandle, SwarmDriver, NOTIFY_PROTOCOL};

use crate::config::{AgentReadyFn, PeerConfig, ProcessEnvelopeFn};
use crate::routing::RoutingTable;
use crate::{PeerError, NEW_STREAM_TIMEOUT};

/// State shared between the router, the stream handlers and the delegate
/// service.
pub(crate) struct PeerInner {
    pub(crate) local_peer_id: PeerId,
    pub(crate) my_agent_address: Option<String>,
    pub(crate) enable_relay: bool,
    pub(crate) delegate_port: u16,
    pub(crate) network: NetworkHandle,
    pub(crate) control: Control,
    pub(crate) table: RoutingTable,
    /// Monotonic: set once this node has published at least one address.
    pub(crate) announced: AtomicBool,
    pub(crate) agent_ready: Option<AgentReadyFn>,
    pub(crate) process_envelope: Option<ProcessEnvelopeFn>,
    /// Per-connection delegate workers, aborted on shutdown.
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerInner {
    /// Tell a peer we joined the network, so it (re)publishes the
    /// addresses it is responsible for.
    pub(crate) async fn notify_peer(&self, peer: PeerId) -> Result<(), PeerError> {
        let mut control = self.control.clone();
        let mut stream = timeout(NEW_STREAM_TIMEOUT, control.open_stream(peer, NOTIFY_PROTOCOL))
            .await
            .map_err(|_| PeerError::Timeout("stream open"))?
            .map_err(|e| PeerError::Stream(e.to_string()))?;

        // The payload is the protocol id itself, unframed; receivers
        // ignore it.
        stream
            .write_all(NOTIFY_PROTOCOL.as_ref().as_bytes())
            .await?;
        let _ = stream.close().await;
        Ok(())
    }
}

/// A full ACN node: a Kademlia participant that hosts at most one local
/// agent, relays for registered relay clients and gateways for attached
/// delegate clients.
pub struct AcnPeer {
    inner: Arc<PeerInner>,
    peer_id: PeerId,
    public_addr: Multiaddr,
    closing: watch::Sender<bool>,
    driver_task: Option<JoinHandle<()>>,
    handler_tasks: Vec<JoinHandle<()>>,
    delegate_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AcnPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcnPeer")
            .field("peer_id", &self.peer_id)
            .field("public_addr", &self.public_addr)
            .finish()
    }
}

impl AcnPeer {
    /// Build and start a peer.
    ///
    /// Validates the configuration, brings up the libp2p host with the
    /// public address advertised, joins the network through the bootstrap
    /// peers if any, installs the stream handlers and, when configured,
    /// starts the delegate service. Returns once everything is accepting.
    pub async fn new(config: PeerConfig) -> Result<Self, PeerError> {
        let keypair = config
            .keypair
            .clone()
            .ok_or_else(|| PeerError::Config("private key must be provided".into()))?;
        let local_addr = config
            .local_addr
            .clone()
            .ok_or_else(|| PeerError::Config("local multiaddr must be set".into()))?;
        let public_addr = config
            .public_addr
            .clone()
            .ok_or_else(|| PeerError::Config("public multiaddr must be set".into()))?;

        let host_config = HostConfig {
            local_addr: local_addr.clone(),
            public_addr: public_addr.clone(),
            enable_relay: config.enable_relay,
        };
        let (swarm, local_peer_id, streams) = build_swarm(keypair, &host_config)?;
        let (driver, network) = SwarmDriver::new(swarm);
        let driver_task = tokio::spawn(driver.run());

        let inner = Arc::new(PeerInner {
            local_peer_id,
            my_agent_address: config.my_agent_address.clone(),
            enable_relay: config.enable_relay,
            delegate_port: config.delegate_port,
            network,
            control: streams.control.clone(),
            table: RoutingTable::default(),
            announced: AtomicBool::new(false),
            agent_ready: config.agent_ready.clone(),
            process_envelope: config.process_envelope.clone(),
            workers: Mutex::new(Vec::new()),
        });

        // Join an existing network through the bootstrap peers.
        let joined: Result<(), PeerError> = async {
            if config.bootstrap_peers.is_empty() {
                return Ok(());
            }
            info!(peers = config.bootstrap_peers.len(), "bootstrapping from known peers");
            for (peer, addr) in &config.bootstrap_peers {
                inner.network.dial(*peer, addr.clone()).await?;
            }
            inner.network.bootstrap().await?;

            for (peer, _) in &config.bootstrap_peers {
                inner.notify_peer(*peer).await?;
            }

            // Joining a live network means Provide can succeed right away.
            if let Some(my_addr) = &inner.my_agent_address {
                inner.register_agent_address(my_addr).await?;
                inner.announced.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
        .await;
        if let Err(e) = joined {
            abort_tasks(vec![driver_task]).await;
            return Err(e);
        }

        let mut handler_tasks = Vec::new();
        if let Some(register) = streams.register {
            handler_tasks.push(tokio::spawn(inner.clone().run_register_handler(register)));
        }
        handler_tasks.push(tokio::spawn(inner.clone().run_address_handler(streams.address)));
        handler_tasks.push(tokio::spawn(inner.clone().run_envelope_handler(streams.envelope)));
        handler_tasks.push(tokio::spawn(inner.clone().run_notify_handler(streams.notify)));

        let (closing, closing_rx) = watch::channel(false);

        let delegate_task = if config.delegate_port != 0 {
            let ip = multiaddr_ip(&local_addr).unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            let listener = match TcpListener::bind((ip, config.delegate_port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    handler_tasks.push(driver_task);
                    abort_tasks(handler_tasks).await;
                    return Err(PeerError::Transport(e));
                }
            };
            Some(tokio::spawn(
                inner.clone().run_delegate_service(listener, closing_rx),
            ))
        } else {
            None
        };

        info!(peer_id = %local_peer_id, "ACN peer started");

        Ok(Self {
            inner,
            peer_id: local_peer_id,
            public_addr,
            closing,
            driver_task: Some(driver_task),
            handler_tasks,
            delegate_task,
        })
    }

    /// This node's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The advertised multiaddr including the `/p2p/` suffix, suitable as
    /// a bootstrap entry for other nodes.
    pub fn multiaddr(&self) -> Multiaddr {
        self.public_addr.clone().with(Protocol::P2p(self.peer_id))
    }

    /// Whether this node has published at least one address to the DHT.
    pub fn announced(&self) -> bool {
        self.inner.announced.load(Ordering::SeqCst)
    }

    /// Route an envelope to its destination.
    pub async fn route(&self, envelope: Envelope) -> Result<(), PeerError> {
        self.inner.route_envelope(envelope).await
    }

    /// Publish this node as provider for an agent address.
    pub async fn register_agent_address(&self, address: &str) -> Result<(), PeerError> {
        self.inner.register_agent_address(address).await
    }

    /// Stop the peer: close the delegate listener and connections, then
    /// tear down the DHT and host. Accumulates every error instead of
    /// short-circuiting.
    pub async fn close(mut self) -> Vec<PeerError> {
        info!("stopping ACN peer");
        let mut status = Vec::new();

        let _ = self.closing.send(true);

        // Delegate accept loop first, so the listener port frees
        // immediately.
        if let Some(task) = self.delegate_task.take() {
            task.abort();
            let _ = task.await;
        }

        for (addr, conn) in self.inner.table.drain_delegates() {
            if let Err(e) = conn.shutdown().await {
                warn!(addr = %addr, %e, "while closing delegate connection");
                status.push(PeerError::Transport(e));
            }
        }

        let workers: Vec<_> = self.inner.workers.lock().unwrap().drain(..).collect();
        abort_tasks(workers).await;
        abort_tasks(self.handler_tasks.drain(..).collect()).await;

        // The swarm driver goes last; dropping it closes the DHT and the
        // host.
        if let Some(task) = self.driver_task.take() {
            task.abort();
            let _ = task.await;
        }

        status
    }
}

async fn abort_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
        let _ = task.await;
    }
}

fn multiaddr_ip(addr: &Multiaddr) -> Option<IpAddr> {
    addr.iter().find_map(|proto| match proto {
        Protocol::Ip4(ip) => Some(IpAddr::V4(ip)),
        Protocol::Ip6(ip) => Some(IpAddr::V6(ip)),
        _ => None,
    })
}
