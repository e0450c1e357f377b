//! Delegate service: plain TCP clients tunnelling envelopes through this
//! node without running any overlay code.
//!
//! Handshake: client sends its framed agent address, the node answers with
//! a framed `"DONE"`, then both sides exchange framed envelopes until EOF.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing::{debug, error, info, warn};

use acn_codec::{read_envelope, read_string};

use crate::peer::PeerInner;
use crate::routing::DelegateConnection;

impl PeerInner {
    /// Accept loop. Runs until the closing signal fires.
    pub(crate) async fn run_delegate_service(
        self: Arc<Self>,
        listener: TcpListener,
        mut closing: watch::Receiver<bool>,
    ) {
        info!(addr = ?listener.local_addr().ok(), "delegate service listening for new connections");
        loop {
            tokio::select! {
                _ = closing.changed() => {
                    info!("delegate service stopped");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok((conn, remote)) => {
                        info!(%remote, "received a new delegate connection");
                        let inner = self.clone();
                        let worker =
                            tokio::spawn(async move { inner.handle_delegate_connection(conn, remote).await });
                        let mut workers = self.workers.lock().unwrap();
                        workers.retain(|w| !w.is_finished());
                        workers.push(worker);
                    }
                    Err(e) => error!(%e, "while accepting a new delegate connection"),
                }
            }
        }
    }

    async fn handle_delegate_connection(self: Arc<Self>, conn: TcpStream, remote: SocketAddr) {
        let (read_half, write_half) = conn.into_split();
        let mut reader = read_half.compat();

        let agent_addr = match read_string(&mut reader).await {
            Ok(addr) => addr,
            Err(e) => {
                error!(%remote, %e, "while receiving agent address");
                return;
            }
        };
        info!(%remote, addr = %agent_addr, "delegate connection established");

        let connection = DelegateConnection::new(write_half.compat_write(), remote);
        self.table.put_delegate(agent_addr.clone(), connection.clone());

        if self.announced.load(Ordering::SeqCst) {
            info!(addr = %agent_addr, "announcing delegate client address");
            if let Err(e) = self.register_agent_address(&agent_addr).await {
                error!(addr = %agent_addr, %e, "while announcing delegate client address");
                self.table.remove_delegate(&agent_addr, &connection);
                return;
            }
        }

        if let Err(e) = connection.send_bytes(b"DONE").await {
            debug!(%remote, %e, "ignored handshake ack write failure");
        }

        loop {
            match read_envelope(&mut reader).await {
                Ok(envelope) => {
                    // Each envelope is routed on its own task; a slow DHT
                    // lookup must not stall this connection's reads.
                    let inner = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = inner.route_envelope(envelope).await {
                            warn!(%e, "failed to route envelope from delegate client");
                        }
                    });
                }
                Err(e) if e.is_eof() => {
                    info!(%remote, "connection closed by client");
                    break;
                }
                Err(e) => {
                    error!(%remote, %e, "while reading envelope from delegate connection");
                    break;
                }
            }
        }

        self.table.remove_delegate(&agent_addr, &connection);
        let _ = connection.shutdown().await;
        debug!(%remote, addr = %agent_addr, "delegate connection cleaned up");
    }
}
