//! Initialize handshake.
//!
//! Immediately after TCP establishment each side sends an initialize letter
//! carrying its 16-byte node id, then waits for the peer's. A channel only
//! reports itself connected once both directions have exchanged initialize.

use crate::receiver::{ReceiveError, Receiver};
use crate::transmitter::Transmitter;
use hyperletter_wire::{Letter, LetterKind, NodeId};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Why the initialize exchange failed
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The peer's initialize did not arrive in time
    #[error("initialize timed out")]
    Timeout,

    /// The peer sent something other than a well-formed initialize letter
    #[error("protocol violation during initialize")]
    Protocol,

    /// The connection failed underneath the handshake
    #[error(transparent)]
    Receive(#[from] ReceiveError),
}

/// Send the local initialize letter
pub async fn send_initialize<W: AsyncWrite + Unpin>(
    transmitter: &mut Transmitter<W>,
    node: NodeId,
) -> io::Result<()> {
    transmitter.transmit(&Letter::initialize(node)).await?;
    debug!("sent initialize for node {}", node);
    Ok(())
}

/// Wait for the peer's initialize letter and return its node id
///
/// Heartbeats that race ahead of the initialize are ignored; any other
/// letter is a protocol violation.
pub async fn await_initialize<R: AsyncRead + Unpin>(
    receiver: &mut Receiver<R>,
    deadline: Duration,
) -> Result<NodeId, HandshakeError> {
    let exchange = async {
        loop {
            let letter = receiver.recv().await?;
            match letter.kind {
                LetterKind::Initialize => {
                    return letter.initialize_node_id().ok_or(HandshakeError::Protocol);
                }
                LetterKind::Heartbeat => continue,
                _ => return Err(HandshakeError::Protocol),
            }
        }
    };

    match tokio::time::timeout(deadline, exchange).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperletter_wire::LetterOptions;

    #[tokio::test]
    async fn test_initialize_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let node = NodeId::new_v4();

        let mut tx = Transmitter::new(client);
        send_initialize(&mut tx, node).await.unwrap();

        let mut rx = Receiver::new(server);
        let peer = await_initialize(&mut rx, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(peer, node);
    }

    #[tokio::test]
    async fn test_initialize_times_out() {
        let (_client, server) = tokio::io::duplex(1024);
        let mut rx = Receiver::new(server);

        let err = await_initialize(&mut rx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Timeout));
    }

    #[tokio::test]
    async fn test_unexpected_letter_is_protocol_violation() {
        let (client, server) = tokio::io::duplex(1024);

        let mut tx = Transmitter::new(client);
        tx.transmit(&Letter::user(LetterOptions::empty(), "nope"))
            .await
            .unwrap();

        let mut rx = Receiver::new(server);
        let err = await_initialize(&mut rx, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::Protocol));
    }
}
