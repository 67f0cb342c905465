//! Per-connection lifecycle and wire engine for hyperletter.
//!
//! This crate owns everything that happens on one TCP connection between two
//! peers: the initialize handshake, the write loop with acknowledgement
//! tracking, the read loop with reply-ack semantics, heartbeat prompting,
//! the optional batching decorator, and the listener that produces inbound
//! channels.
//!
//! ## Features
//!
//! - **Handshake**: initialize letters exchange 16-byte node ids before a
//!   channel reports itself connected
//! - **Ack tracking**: one in-flight letter at a time, with a deadline;
//!   `Sent` fires only once the matching ack arrives
//! - **Auto-reconnect**: outbound channels redial with exponential backoff
//!   and jitter until disconnected on purpose
//! - **Batching**: a decorator that coalesces queued letters into batch
//!   envelopes under configured thresholds

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod channel;
pub mod events;
pub mod handshake;
pub mod heartbeat;
pub mod listener;
pub mod receiver;
pub mod transmitter;

// Re-export main types
pub use batch::{spawn_batching, BatchConfig};
pub use channel::{
    spawn_inbound, spawn_outbound, ChannelCommand, ChannelConfig, ChannelDirection,
    ChannelHandle,
};
pub use events::{ChannelEvent, DisconnectReason};
pub use handshake::{await_initialize, send_initialize, HandshakeError};
pub use heartbeat::Heartbeat;
pub use listener::{spawn_listener, ListenerHandle};
pub use receiver::{ReceiveError, Receiver};
pub use transmitter::Transmitter;
