//! Command-driven swarm driver.
//!
//! rust-libp2p swarms make progress only while polled, so one task owns the
//! [`Swarm`] and everything else talks to it through [`NetworkHandle`].
//! Kademlia queries are joined back to their callers by query id.

use std::collections::HashMap;

use futures::StreamExt;
use libp2p::{
    identify, kad,
    swarm::{dial_opts::DialOpts, SwarmEvent},
    Multiaddr, PeerId, Swarm,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::behaviour::{AcnBehaviour, AcnBehaviourEvent};
use crate::node::NetworkError;

const COMMAND_CHANNEL_CAPACITY: usize = 64;

enum NetworkCommand {
    StartProviding {
        key: kad::RecordKey,
        reply: oneshot::Sender<Result<(), NetworkError>>,
    },
    FindProviders {
        key: kad::RecordKey,
        reply: oneshot::Sender<Result<Vec<PeerId>, NetworkError>>,
    },
    AddAddress {
        peer: PeerId,
        addr: Multiaddr,
    },
    DialPeer {
        peer: PeerId,
        addr: Multiaddr,
        reply: oneshot::Sender<Result<(), NetworkError>>,
    },
    InRoutingTable {
        peer: PeerId,
        reply: oneshot::Sender<bool>,
    },
    Bootstrap,
}

/// Cloneable handle to the swarm driver task.
#[derive(Clone)]
pub struct NetworkHandle {
    tx: mpsc::Sender<NetworkCommand>,
}

impl NetworkHandle {
    async fn request<T>(
        &self,
        command: NetworkCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, NetworkError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| NetworkError::ChannelClosed)?;
        rx.await.map_err(|_| NetworkError::ChannelClosed)
    }

    /// Announce this node as a provider for `key`. Resolves when the
    /// provider record has been published (or the query failed).
    pub async fn start_providing(&self, key: kad::RecordKey) -> Result<(), NetworkError> {
        let (reply, rx) = oneshot::channel();
        self.request(NetworkCommand::StartProviding { key, reply }, rx)
            .await?
    }

    /// Run one provider search round. An empty vec means the query finished
    /// without finding anyone; callers decide whether to retry.
    pub async fn find_providers(&self, key: kad::RecordKey) -> Result<Vec<PeerId>, NetworkError> {
        let (reply, rx) = oneshot::channel();
        self.request(NetworkCommand::FindProviders { key, reply }, rx)
            .await?
    }

    /// Record a known transport address for a peer.
    pub async fn add_address(&self, peer: PeerId, addr: Multiaddr) -> Result<(), NetworkError> {
        self.tx
            .send(NetworkCommand::AddAddress { peer, addr })
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }

    /// Dial a peer at a known address and wait for the connection.
    pub async fn dial(&self, peer: PeerId, addr: Multiaddr) -> Result<(), NetworkError> {
        let (reply, rx) = oneshot::channel();
        self.request(NetworkCommand::DialPeer { peer, addr, reply }, rx)
            .await?
    }

    /// Whether `peer` is present in the local Kademlia routing table.
    pub async fn in_routing_table(&self, peer: PeerId) -> Result<bool, NetworkError> {
        let (reply, rx) = oneshot::channel();
        self.request(NetworkCommand::InRoutingTable { peer, reply }, rx)
            .await
    }

    /// Kick off a Kademlia bootstrap round.
    pub async fn bootstrap(&self) -> Result<(), NetworkError> {
        self.tx
            .send(NetworkCommand::Bootstrap)
            .await
            .map_err(|_| NetworkError::ChannelClosed)
    }
}

/// Per-query state for an in-flight provider search.
struct ProviderQuery {
    reply: Option<oneshot::Sender<Result<Vec<PeerId>, NetworkError>>>,
}

/// Owns the swarm; run on its own task.
pub struct SwarmDriver {
    swarm: Swarm<AcnBehaviour>,
    commands: mpsc::Receiver<NetworkCommand>,
    pending_provides: HashMap<kad::QueryId, oneshot::Sender<Result<(), NetworkError>>>,
    provider_queries: HashMap<kad::QueryId, ProviderQuery>,
    pending_dials: HashMap<PeerId, Vec<oneshot::Sender<Result<(), NetworkError>>>>,
}

impl SwarmDriver {
    pub fn new(swarm: Swarm<AcnBehaviour>) -> (Self, NetworkHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let driver = Self {
            swarm,
            commands,
            pending_provides: HashMap::new(),
            provider_queries: HashMap::new(),
            pending_dials: HashMap::new(),
        };
        (driver, NetworkHandle { tx })
    }

    /// Drive the swarm until every [`NetworkHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all network handles dropped, stopping swarm driver");
                        return;
                    }
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
    }

    fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::StartProviding { key, reply } => {
                match self.swarm.behaviour_mut().kademlia.start_providing(key) {
                    Ok(query_id) => {
                        self.pending_provides.insert(query_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(NetworkError::Dht(e.to_string())));
                    }
                }
            }
            NetworkCommand::FindProviders { key, reply } => {
                let query_id = self.swarm.behaviour_mut().kademlia.get_providers(key);
                self.provider_queries
                    .insert(query_id, ProviderQuery { reply: Some(reply) });
            }
            NetworkCommand::AddAddress { peer, addr } => {
                self.swarm.behaviour_mut().kademlia.add_address(&peer, addr);
            }
            NetworkCommand::DialPeer { peer, addr, reply } => {
                if self.swarm.is_connected(&peer) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer, addr.clone());
                let opts = DialOpts::peer_id(peer).addresses(vec![addr]).build();
                match self.swarm.dial(opts) {
                    Ok(()) => self.pending_dials.entry(peer).or_default().push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(NetworkError::Dial(e.to_string())));
                    }
                }
            }
            NetworkCommand::InRoutingTable { peer, reply } => {
                let present = self
                    .swarm
                    .behaviour_mut()
                    .kademlia
                    .kbucket(peer)
                    .map(|bucket| bucket.iter().any(|entry| entry.node.key.preimage() == &peer))
                    .unwrap_or(false);
                let _ = reply.send(present);
            }
            NetworkCommand::Bootstrap => {
                if let Err(e) = self.swarm.behaviour_mut().kademlia.bootstrap() {
                    warn!(%e, "kademlia bootstrap failed");
                }
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<AcnBehaviourEvent>) {
        match event {
            SwarmEvent::Behaviour(AcnBehaviourEvent::Kademlia(event)) => {
                self.handle_kademlia_event(event);
            }
            SwarmEvent::Behaviour(AcnBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                // Feed identified listen addresses into Kademlia so the
                // peer becomes dialable by id alone.
                for addr in info.listen_addrs {
                    self.swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr);
                }
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    for reply in waiters {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if let Some(waiters) = self.pending_dials.remove(&peer_id) {
                    warn!(peer = %peer_id, %error, "dial failed");
                    for reply in waiters {
                        let _ = reply.send(Err(NetworkError::Dial(error.to_string())));
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_kademlia_event(&mut self, event: kad::Event) {
        let kad::Event::OutboundQueryProgressed { id, result, .. } = event else {
            return;
        };

        match result {
            kad::QueryResult::StartProviding(result) => {
                if let Some(reply) = self.pending_provides.remove(&id) {
                    let outcome = result
                        .map(|_| ())
                        .map_err(|e| NetworkError::Dht(e.to_string()));
                    let _ = reply.send(outcome);
                }
            }
            kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                providers,
                ..
            })) => {
                if !providers.is_empty() {
                    if let Some(query) = self.provider_queries.get_mut(&id) {
                        if let Some(reply) = query.reply.take() {
                            let _ = reply.send(Ok(providers.into_iter().collect()));
                        }
                    }
                    // One provider is enough; stop the query early.
                    if let Some(mut query) = self.swarm.behaviour_mut().kademlia.query_mut(&id) {
                        query.finish();
                    }
                }
            }
            kad::QueryResult::GetProviders(Ok(
                kad::GetProvidersOk::FinishedWithNoAdditionalRecord { .. },
            )) => {
                if let Some(mut query) = self.provider_queries.remove(&id) {
                    if let Some(reply) = query.reply.take() {
                        let _ = reply.send(Ok(Vec::new()));
                    }
                }
            }
            kad::QueryResult::GetProviders(Err(kad::GetProvidersError::Timeout { .. })) => {
                // Treated like an empty round; the lookup engine retries
                // within its own deadline.
                if let Some(mut query) = self.provider_queries.remove(&id) {
                    if let Some(reply) = query.reply.take() {
                        let _ = reply.send(Ok(Vec::new()));
                    }
                }
            }
            _ => {}
        }
    }
}
