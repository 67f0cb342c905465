//! Channel lifecycle events and disconnect reasons.

use hyperletter_wire::{Letter, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Why a channel left the connected state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Local disconnect or dispose request
    Requested,
    /// I/O failure, malformed frame, or missed liveness deadline
    Socket,
    /// The peer did not acknowledge an in-flight letter in time
    AckTimeout,
    /// The initialize exchange did not complete in time
    Handshake,
    /// The peer sent a shutdown letter or closed the connection gracefully
    Remote,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::Socket => "socket",
            DisconnectReason::AckTimeout => "ack timeout",
            DisconnectReason::Handshake => "handshake",
            DisconnectReason::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Events a channel reports to its socket
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// An outbound channel is dialing its remote endpoint
    Connecting {
        /// Channel key
        binding: SocketAddr,
    },
    /// The initialize exchange completed
    Initialized {
        /// Channel key
        binding: SocketAddr,
        /// Node id the peer advertised
        remote_node: NodeId,
    },
    /// The channel is connected, its queue is empty and nothing is in flight
    Available {
        /// Channel key
        binding: SocketAddr,
    },
    /// A letter arrived for the application
    Received {
        /// Channel key
        binding: SocketAddr,
        /// Node id of the sending peer
        remote_node: NodeId,
        /// The decoded letter
        letter: Letter,
    },
    /// A letter was delivered (written, and acknowledged when required)
    Sent {
        /// Channel key
        binding: SocketAddr,
        /// The delivered letter
        letter: Letter,
    },
    /// A letter could not be delivered on this channel
    FailedToSend {
        /// Channel key
        binding: SocketAddr,
        /// The undelivered letter
        letter: Letter,
    },
    /// The connection ended
    Disconnected {
        /// Channel key
        binding: SocketAddr,
        /// Peer node id, when the handshake had completed
        remote_node: Option<NodeId>,
        /// Why the connection ended
        reason: DisconnectReason,
    },
}
