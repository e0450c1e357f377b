//! ACN node daemon
//!
//! Runs a full ACN peer: DHT participant, relay service for lightweight
//! clients and, optionally, a delegate endpoint for plain TCP clients.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use acn_keystore::{load_or_generate_keypair, DEFAULT_KEYFILE};
use acn_network::{parse_bootstrap_nodes, Multiaddr};
use acn_peer::{AcnPeer, PeerConfig};

/// ACN - Agent Communication Network peer node
#[derive(Parser)]
#[command(name = "acn-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Host to bind the overlay transport on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the overlay transport on
    #[arg(long, default_value = "9000")]
    port: u16,

    /// Publicly reachable host advertised to the network
    #[arg(long)]
    public_host: Option<String>,

    /// Publicly reachable port advertised to the network
    #[arg(long)]
    public_port: Option<u16>,

    /// TCP port for the delegate service (0 disables)
    #[arg(long, default_value = "0")]
    delegate_port: u16,

    /// Bootstrap peer multiaddr (/ip4/<IP>/tcp/<PORT>/p2p/<PEER_ID>), repeatable
    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,

    /// Disable the relay registration service
    #[arg(long)]
    no_relay: bool,

    /// Agent address hosted on this node
    #[arg(long)]
    agent_address: Option<String>,

    /// Path to the node identity keyfile
    #[arg(long, default_value = DEFAULT_KEYFILE)]
    key: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    acn_logging::init(cli.verbose);

    let keypair = load_or_generate_keypair(&cli.key).context("loading node identity")?;

    let local_addr: Multiaddr = format!("/ip4/{}/tcp/{}", cli.host, cli.port)
        .parse()
        .context("invalid local address")?;
    let public_host = cli.public_host.as_deref().unwrap_or(&cli.host);
    let public_port = cli.public_port.unwrap_or(cli.port);
    let public_addr: Multiaddr = format!("/ip4/{}/tcp/{}", public_host, public_port)
        .parse()
        .context("invalid public address")?;

    let bootstrap_peers = parse_bootstrap_nodes(&cli.bootstrap);
    if bootstrap_peers.len() != cli.bootstrap.len() {
        warn!("some bootstrap entries could not be parsed and were skipped");
    }

    let config = PeerConfig {
        delegate_port: cli.delegate_port,
        bootstrap_peers,
        enable_relay: !cli.no_relay,
        my_agent_address: cli.agent_address.clone(),
        ..PeerConfig::new(keypair, local_addr, public_addr)
    };

    let peer = AcnPeer::new(config).await.context("starting peer")?;
    info!("node started, reachable at {}", peer.multiaddr());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for e in peer.close().await {
        warn!(%e, "error during shutdown");
    }

    Ok(())
}
