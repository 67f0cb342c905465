//! Point-to-point and multi-peer messaging over TCP.
//!
//! Peers hold bidirectional TCP connections over which they exchange
//! self-delimited framed messages ("letters") with optional
//! acknowledgement, multicast fan-out, batching, and requeue-on-failure.
//! Create a socket, bind listening endpoints and/or dial outbound
//! endpoints, then enqueue letters; the socket picks an available channel,
//! transmits, and surfaces delivery outcomes as events.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hyperletter::{Letter, LetterOptions, Socket, SocketConfig, SocketEvent};
//!
//! # async fn example() -> Result<(), hyperletter::SocketError> {
//! let (server, mut server_events) = Socket::new(SocketConfig::default());
//! let addr = server.bind("127.0.0.1:8001".parse().unwrap()).await?;
//!
//! let (client, _client_events) = Socket::new(SocketConfig::default());
//! client.connect(addr)?;
//! client.send(Letter::user(LetterOptions::ACK, "hi"))?;
//!
//! while let Some(event) = server_events.recv().await {
//!     match event {
//!         SocketEvent::Received { from, letter, .. } => {
//!             println!("letter from node {}: {:?}", from, letter.parts[0].data);
//!             // reply straight to the sender
//!             server.send_to(Letter::user(LetterOptions::empty(), "hello yourself"), from)?;
//!         }
//!         SocketEvent::Disconnected { binding, reason } => {
//!             println!("{} went away: {}", binding, reason);
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery semantics
//!
//! - A letter with [`LetterOptions::ACK`] is only reported `Sent` once the
//!   peer's acknowledgement came back; a missed ack deadline disconnects
//!   the channel and fails the letter.
//! - A failed unicast letter with [`LetterOptions::REQUEUE`] re-enters the
//!   dispatcher; anything else that fails is discarded, silently when
//!   [`LetterOptions::SILENT_DISCARD`] is set.
//! - Multicast letters go to every connected channel; partial failures
//!   discard, never requeue.
//! - Batching, when enabled, coalesces queued letters into batch envelopes;
//!   acknowledgement of individual letters inside a batch is not honored on
//!   the wire.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod dispatcher;
pub mod error;
pub mod events;
pub mod socket;

// Re-export main types
pub use config::{BackoffConfig, HeartbeatConfig, SocketConfig};
pub use error::SocketError;
pub use events::{SocketEvent, SocketEvents};
pub use socket::Socket;

// Re-export the building blocks callers see in letters and events
pub use hyperletter_channel::{BatchConfig, DisconnectReason};
pub use hyperletter_wire::{
    Letter, LetterId, LetterKind, LetterOptions, NodeId, Part, PartKind, WireError,
};
