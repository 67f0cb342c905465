//! TCP listener producing inbound channels.

use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle for a running listener
#[derive(Debug)]
pub struct ListenerHandle {
    binding: SocketAddr,
    token: CancellationToken,
}

impl ListenerHandle {
    /// The address the listener is actually bound to
    pub fn binding(&self) -> SocketAddr {
        self.binding
    }

    /// Stop accepting; already-accepted channels continue
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Bind a listener and spawn its accept loop
///
/// Accepted streams are handed to `accept_tx`; the socket turns each one
/// into an inbound channel. Binding failures (address in use, permission)
/// surface synchronously.
pub async fn spawn_listener(
    addr: SocketAddr,
    accept_tx: mpsc::UnboundedSender<TcpStream>,
    parent: &CancellationToken,
) -> io::Result<ListenerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let binding = listener.local_addr()?;
    let token = parent.child_token();
    info!("listening on {}", binding);

    let loop_token = token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = loop_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted connection from {}", peer);
                        if accept_tx.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("accept on {} failed: {}", binding, e);
                    }
                },
            }
        }
        info!("listener on {} stopped", binding);
    });

    Ok(ListenerHandle { binding, token })
}
