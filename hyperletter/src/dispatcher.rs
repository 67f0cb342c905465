//! The letter dispatcher.
//!
//! Matches queued letters against ready channels. Two queues: a FIFO of
//! pending letters and a FIFO of ready channels in which a channel appears
//! at most once. Matching runs whenever either queue changes, one letter at
//! a time: unicast letters go to the channel at the front of the ready
//! queue; multicast letters are copied onto a snapshot of every connected
//! channel. Ready channels re-enter the queue at the back, so availability
//! events serve channels round-robin under steady load.

use crate::events::{emit_discard, SocketEvent};
use dashmap::DashMap;
use hyperletter_channel::ChannelHandle;
use hyperletter_wire::{Letter, LetterOptions};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Commands fed to the dispatcher task
#[derive(Debug)]
pub(crate) enum DispatchCommand {
    /// A freshly enqueued letter
    Send(Letter),
    /// A failed letter re-entering the queue
    Requeue(Letter),
    /// A channel became available
    Ready(SocketAddr),
    /// A channel left the connected state
    Forget(SocketAddr),
}

pub(crate) struct Dispatcher {
    connected: Arc<DashMap<SocketAddr, ChannelHandle>>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    cmd_rx: mpsc::UnboundedReceiver<DispatchCommand>,
    token: CancellationToken,
    pending: VecDeque<Letter>,
    ready: VecDeque<SocketAddr>,
    ready_set: HashSet<SocketAddr>,
}

impl Dispatcher {
    pub(crate) fn new(
        connected: Arc<DashMap<SocketAddr, ChannelHandle>>,
        event_tx: mpsc::UnboundedSender<SocketEvent>,
        cmd_rx: mpsc::UnboundedReceiver<DispatchCommand>,
        token: CancellationToken,
    ) -> Self {
        Self {
            connected,
            event_tx,
            cmd_rx,
            token,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            ready_set: HashSet::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                cmd = self.cmd_rx.recv() => match cmd {
                    None => break,
                    Some(cmd) => {
                        self.handle(cmd);
                        self.try_match();
                    }
                },
            }
        }
    }

    fn handle(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Send(letter) | DispatchCommand::Requeue(letter) => {
                self.pending.push_back(letter);
            }
            DispatchCommand::Ready(binding) => {
                if self.connected.contains_key(&binding) && self.ready_set.insert(binding) {
                    self.ready.push_back(binding);
                }
            }
            DispatchCommand::Forget(binding) => {
                if self.ready_set.remove(&binding) {
                    self.ready.retain(|b| *b != binding);
                }
            }
        }
    }

    fn try_match(&mut self) {
        while let Some(front) = self.pending.front() {
            if front.is_multicast() {
                let letter = self.pending.pop_front().unwrap();
                self.fan_out(letter);
                continue;
            }

            let Some(handle) = self.next_ready() else {
                // no ready channel; the letter stays queued
                break;
            };
            let letter = self.pending.pop_front().unwrap();
            if let Err(letter) = handle.enqueue(letter) {
                self.requeue_or_discard(handle.binding(), letter);
            }
        }
    }

    /// Pop ready channels until one is still connected
    fn next_ready(&mut self) -> Option<ChannelHandle> {
        while let Some(binding) = self.ready.pop_front() {
            self.ready_set.remove(&binding);
            if let Some(entry) = self.connected.get(&binding) {
                return Some(entry.value().clone());
            }
        }
        None
    }

    /// Copy a letter onto every connected channel
    ///
    /// Fan-out failures never requeue; a letter that finds no connected
    /// channel at all is discarded.
    fn fan_out(&mut self, letter: Letter) {
        let handles: Vec<ChannelHandle> = self
            .connected
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        if handles.is_empty() {
            debug!("multicast letter with no connected channels");
            emit_discard(&self.event_tx, None, letter);
            return;
        }

        for handle in handles {
            if let Err(copy) = handle.enqueue(letter.clone()) {
                emit_discard(&self.event_tx, Some(handle.binding()), copy);
            }
        }
    }

    /// Delivery failed at hand-off (channel task already gone)
    fn requeue_or_discard(&mut self, binding: SocketAddr, letter: Letter) {
        if letter.options.contains(LetterOptions::REQUEUE) {
            let _ = self.event_tx.send(SocketEvent::Requeued {
                letter: letter.clone(),
            });
            self.pending.push_back(letter);
        } else {
            emit_discard(&self.event_tx, Some(binding), letter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperletter_channel::{ChannelCommand, ChannelDirection};
    use std::time::Duration;
    use tokio::time::timeout;

    struct Fixture {
        cmd_tx: mpsc::UnboundedSender<DispatchCommand>,
        events: mpsc::UnboundedReceiver<SocketEvent>,
        connected: Arc<DashMap<SocketAddr, ChannelHandle>>,
        token: CancellationToken,
    }

    fn fixture() -> Fixture {
        let connected = Arc::new(DashMap::new());
        let (event_tx, events) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let dispatcher = Dispatcher::new(connected.clone(), event_tx, cmd_rx, token.clone());
        tokio::spawn(dispatcher.run());

        Fixture {
            cmd_tx,
            events,
            connected,
            token,
        }
    }

    fn channel(
        fx: &Fixture,
        port: u16,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<ChannelCommand>) {
        let binding: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        fx.connected.insert(
            binding,
            ChannelHandle::new(binding, ChannelDirection::Outbound, tx),
        );
        (binding, rx)
    }

    async fn expect_letter(rx: &mut mpsc::UnboundedReceiver<ChannelCommand>) -> Letter {
        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
            Some(ChannelCommand::Enqueue(letter)) => letter,
            other => panic!("expected a letter, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_letter_waits_for_a_ready_channel() {
        let fx = fixture();
        let (binding, mut rx) = channel(&fx, 6001);

        fx.cmd_tx
            .send(DispatchCommand::Send(Letter::user(
                LetterOptions::empty(),
                "queued",
            )))
            .unwrap();

        // nothing ready yet
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        fx.cmd_tx.send(DispatchCommand::Ready(binding)).unwrap();
        let letter = expect_letter(&mut rx).await;
        assert_eq!(letter.parts[0].data.as_ref(), b"queued");

        fx.token.cancel();
    }

    #[tokio::test]
    async fn test_ready_channels_serve_fifo() {
        let fx = fixture();
        let (first, mut rx1) = channel(&fx, 6002);
        let (second, mut rx2) = channel(&fx, 6003);

        fx.cmd_tx.send(DispatchCommand::Ready(first)).unwrap();
        fx.cmd_tx.send(DispatchCommand::Ready(second)).unwrap();
        // duplicate readiness is ignored
        fx.cmd_tx.send(DispatchCommand::Ready(first)).unwrap();

        for payload in ["a", "b"] {
            fx.cmd_tx
                .send(DispatchCommand::Send(Letter::user(
                    LetterOptions::empty(),
                    payload,
                )))
                .unwrap();
        }

        assert_eq!(expect_letter(&mut rx1).await.parts[0].data.as_ref(), b"a");
        assert_eq!(expect_letter(&mut rx2).await.parts[0].data.as_ref(), b"b");
        // the duplicate Ready must not deliver a third letter to `first`
        fx.cmd_tx
            .send(DispatchCommand::Send(Letter::user(
                LetterOptions::empty(),
                "c",
            )))
            .unwrap();
        assert!(timeout(Duration::from_millis(50), rx1.recv()).await.is_err());

        fx.token.cancel();
    }

    #[tokio::test]
    async fn test_multicast_copies_to_every_connected_channel() {
        let fx = fixture();
        let (_b1, mut rx1) = channel(&fx, 6004);
        let (_b2, mut rx2) = channel(&fx, 6005);

        fx.cmd_tx
            .send(DispatchCommand::Send(Letter::user(
                LetterOptions::MULTICAST,
                "fan",
            )))
            .unwrap();

        assert_eq!(expect_letter(&mut rx1).await.parts[0].data.as_ref(), b"fan");
        assert_eq!(expect_letter(&mut rx2).await.parts[0].data.as_ref(), b"fan");

        fx.token.cancel();
    }

    #[tokio::test]
    async fn test_multicast_without_channels_is_discarded() {
        let mut fx = fixture();

        fx.cmd_tx
            .send(DispatchCommand::Send(Letter::user(
                LetterOptions::MULTICAST,
                "nowhere",
            )))
            .unwrap();

        match timeout(Duration::from_secs(2), fx.events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            SocketEvent::Discarded { binding, letter } => {
                assert!(binding.is_none());
                assert_eq!(letter.parts[0].data.as_ref(), b"nowhere");
            }
            other => panic!("expected Discarded, got {:?}", other),
        }

        fx.token.cancel();
    }

    #[tokio::test]
    async fn test_silent_discard_emits_nothing() {
        let mut fx = fixture();

        fx.cmd_tx
            .send(DispatchCommand::Send(Letter::user(
                LetterOptions::MULTICAST | LetterOptions::SILENT_DISCARD,
                "hush",
            )))
            .unwrap();

        assert!(
            timeout(Duration::from_millis(100), fx.events.recv())
                .await
                .is_err(),
            "silent discard must not surface an event"
        );

        fx.token.cancel();
    }

    #[tokio::test]
    async fn test_forgotten_channel_is_skipped() {
        let fx = fixture();
        let (binding, mut rx) = channel(&fx, 6006);

        fx.cmd_tx.send(DispatchCommand::Ready(binding)).unwrap();
        fx.cmd_tx.send(DispatchCommand::Forget(binding)).unwrap();
        fx.connected.remove(&binding);

        fx.cmd_tx
            .send(DispatchCommand::Send(Letter::user(
                LetterOptions::empty(),
                "stranded",
            )))
            .unwrap();

        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

        fx.token.cancel();
    }
}
