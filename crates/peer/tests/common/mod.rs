//! Shared helpers for peer integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

use acn_codec::{read_bytes, read_envelope, write_bytes, write_envelope, CodecError};
use acn_peer::{AcnPeer, Envelope, PeerConfig, ProcessEnvelopeFn};

/// Grab a currently free loopback port.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Peer config listening on a fresh loopback port, advertised as-is.
pub fn loopback_config() -> PeerConfig {
    let port = free_port();
    let addr = format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap();
    PeerConfig::new(
        libp2p::identity::Keypair::generate_ed25519(),
        addr,
        format!("/ip4/127.0.0.1/tcp/{}", port).parse().unwrap(),
    )
}

/// An envelope consumer that forwards everything into a channel.
pub fn agent_channel() -> (ProcessEnvelopeFn, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let process: ProcessEnvelopeFn = Arc::new(move |envelope| {
        tx.send(envelope).map_err(|e| e.to_string())?;
        Ok(())
    });
    (process, rx)
}

pub fn sample_envelope(to: &str, sender: &str) -> Envelope {
    Envelope::new(to, sender, "fipa/0.1.0", b"test payload".to_vec())
}

/// Poll until the peer reports itself announced.
pub async fn wait_for_announced(peer: &AcnPeer, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if peer.announced() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// A delegate client: plain TCP, no overlay code.
pub struct DelegateClient {
    reader: Compat<tokio::net::tcp::OwnedReadHalf>,
    writer: Compat<tokio::net::tcp::OwnedWriteHalf>,
}

impl DelegateClient {
    /// Connect and run the registration handshake.
    pub async fn connect(port: u16, agent_addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: read_half.compat(),
            writer: write_half.compat_write(),
        };

        write_bytes(&mut client.writer, agent_addr.as_bytes()).await?;
        let ack = read_bytes(&mut client.reader).await?;
        anyhow::ensure!(ack == b"DONE", "unexpected handshake ack: {:?}", ack);
        Ok(client)
    }

    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), CodecError> {
        write_envelope(&mut self.writer, envelope).await
    }

    pub async fn recv(&mut self) -> Result<Envelope, CodecError> {
        read_envelope(&mut self.reader).await
    }
}
