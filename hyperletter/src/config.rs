//! Socket configuration.

use hyperletter_channel::{BatchConfig, ChannelConfig};
use hyperletter_wire::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Timer period; also the idle threshold before a heartbeat is written
    pub interval: Duration,
    /// Silent intervals tolerated before a peer is declared dead
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_missed: 3,
        }
    }
}

/// Reconnect backoff for outbound channels, exponential with jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First delay
    pub initial: Duration,
    /// Delay ceiling
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Local identifier advertised during the initialize handshake; a fresh
    /// random value per socket by default
    pub node_id: NodeId,
    /// Heartbeat timing
    pub heartbeat: HeartbeatConfig,
    /// How long a channel waits for the peer's initialize
    pub initialization_timeout: Duration,
    /// How long a channel waits for an acknowledgement
    pub ack_timeout: Duration,
    /// Batching thresholds; the decorator is only inserted when enabled
    pub batch: BatchConfig,
    /// Reconnect backoff
    pub backoff: BackoffConfig,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new_v4(),
            heartbeat: HeartbeatConfig::default(),
            initialization_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            batch: BatchConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SocketConfig {
    /// The per-channel slice of this configuration
    pub(crate) fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            node_id: self.node_id,
            initialization_timeout: self.initialization_timeout,
            ack_timeout: self.ack_timeout,
            heartbeat_interval: self.heartbeat.interval,
            heartbeat_max_missed: self.heartbeat.max_missed,
            backoff_initial: self.backoff.initial,
            backoff_max: self.backoff.max,
        }
    }
}
