//! Socket error types.
//!
//! Only bind and connect fail synchronously; everything else surfaces as
//! events.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors returned by socket operations
#[derive(Error, Debug)]
pub enum SocketError {
    /// The OS rejected the listening endpoint (address in use, permission)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested endpoint
        addr: SocketAddr,
        /// Underlying rejection
        #[source]
        source: io::Error,
    },

    /// The endpoint cannot be dialed (port zero)
    #[error("invalid binding {0}")]
    InvalidBinding(SocketAddr),

    /// The socket was disposed and no longer accepts work
    #[error("letter queue closed")]
    QueueClosed,
}
