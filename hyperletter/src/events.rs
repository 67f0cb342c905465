//! The socket event surface.
//!
//! All delivery outcomes and lifecycle changes arrive here; the socket has
//! no other failure reporting beyond the synchronous bind/connect checks.
//! Events are fired from I/O tasks, so consumers should drain them promptly
//! or hand them off.

use hyperletter_channel::DisconnectReason;
use hyperletter_wire::{Letter, LetterOptions, NodeId};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::debug;

/// Events emitted by a socket
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// An outbound channel is dialing
    Connecting {
        /// Channel key
        binding: SocketAddr,
    },
    /// A channel completed its initialize exchange
    Connected {
        /// Channel key
        binding: SocketAddr,
        /// Node id the peer advertised
        remote_node: NodeId,
    },
    /// A letter arrived
    Received {
        /// Channel it arrived on
        binding: SocketAddr,
        /// Node id of the sender, usable with `send_to` for replies
        from: NodeId,
        /// The letter
        letter: Letter,
    },
    /// A letter was delivered (and acknowledged, when requested)
    Sent {
        /// Channel it went out on
        binding: SocketAddr,
        /// The letter
        letter: Letter,
    },
    /// A failed letter re-entered the dispatcher
    Requeued {
        /// The letter
        letter: Letter,
    },
    /// A letter was dropped for good
    Discarded {
        /// Channel the drop happened on, if any
        binding: Option<SocketAddr>,
        /// The letter
        letter: Letter,
    },
    /// A channel left the connected state
    Disconnected {
        /// Channel key
        binding: SocketAddr,
        /// Why
        reason: DisconnectReason,
    },
    /// The socket was disposed
    Disposed,
}

/// Receiving side of a socket's event stream
#[derive(Debug)]
pub struct SocketEvents {
    pub(crate) rx: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketEvents {
    /// Next event, or `None` once the socket is gone
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.rx.recv().await
    }
}

/// Drop a letter, surfacing `Discarded` unless the options forbid it
pub(crate) fn emit_discard(
    event_tx: &mpsc::UnboundedSender<SocketEvent>,
    binding: Option<SocketAddr>,
    letter: Letter,
) {
    if letter.options.contains(LetterOptions::SILENT_DISCARD) {
        debug!("silently discarding letter {:?}", letter.id);
        return;
    }
    let _ = event_tx.send(SocketEvent::Discarded { binding, letter });
}
