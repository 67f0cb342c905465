//! The heartbeat timer.
//!
//! One timer per socket. Each tick prompts every registered channel: an
//! idle channel writes a heartbeat letter, and a channel whose peer has
//! been silent past the liveness deadline disconnects itself.

use crate::channel::ChannelHandle;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Socket-wide heartbeat driver
pub struct Heartbeat;

impl Heartbeat {
    /// Spawn the timer over a shared channel registry
    pub fn spawn(
        channels: Arc<DashMap<SocketAddr, ChannelHandle>>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for entry in channels.iter() {
                            entry.value().poke();
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelCommand, ChannelDirection};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_ticks_poke_every_channel() {
        let channels = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let binding: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        channels.insert(
            binding,
            ChannelHandle::new(binding, ChannelDirection::Outbound, tx),
        );

        let token = CancellationToken::new();
        let task = Heartbeat::spawn(channels, Duration::from_millis(20), token.clone());

        let cmd = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(cmd, Some(ChannelCommand::Poke)));

        token.cancel();
        let _ = task.await;
    }
}
