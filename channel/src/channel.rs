//! The channel state machine.
//!
//! A channel owns one TCP connection exclusively and runs it as a single
//! task: handshake first, then a select loop draining the outbound queue,
//! the socket, the ack deadline and the command stream. Inbound channels
//! terminate on any disconnect; outbound channels redial with exponential
//! backoff and jitter until disconnected on purpose.
//!
//! Within one channel, user letters are written in enqueue order. Reply
//! acks jump ahead of queued user letters but never pre-empt a letter that
//! is already being written. A letter whose options request acknowledgement
//! occupies the single in-flight slot after the write, and nothing else is
//! written until the matching ack arrives or the deadline fires.

use crate::events::{ChannelEvent, DisconnectReason};
use crate::handshake::{await_initialize, send_initialize, HandshakeError};
use crate::receiver::{ReceiveError, Receiver};
use crate::transmitter::Transmitter;
use hyperletter_wire::{decode_frame, Letter, LetterKind, NodeId};
use rand::Rng;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether the channel was accepted or dialed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    /// Accepted by a listener; terminates permanently on disconnect
    Inbound,
    /// Dialer-initiated; survives transient disconnects
    Outbound,
}

/// Per-channel configuration, derived from the socket configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Node id advertised in the initialize letter
    pub node_id: NodeId,
    /// How long to wait for the peer's initialize
    pub initialization_timeout: Duration,
    /// How long to wait for an acknowledgement
    pub ack_timeout: Duration,
    /// Idle threshold before a heartbeat letter is written
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before the peer is declared dead
    pub heartbeat_max_missed: u32,
    /// First reconnect delay for outbound channels
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling
    pub backoff_max: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new_v4(),
            initialization_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_max_missed: 3,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Commands a channel accepts from its socket
#[derive(Debug)]
pub enum ChannelCommand {
    /// Queue a letter for transmission
    Enqueue(Letter),
    /// Heartbeat timer tick: emit a heartbeat if idle, check liveness
    Poke,
    /// Graceful shutdown request
    Disconnect,
}

/// Cloneable handle for driving a channel task
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    binding: SocketAddr,
    direction: ChannelDirection,
    tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    /// Create a handle over a command sender
    pub fn new(
        binding: SocketAddr,
        direction: ChannelDirection,
        tx: mpsc::UnboundedSender<ChannelCommand>,
    ) -> Self {
        Self {
            binding,
            direction,
            tx,
        }
    }

    /// Channel key
    pub fn binding(&self) -> SocketAddr {
        self.binding
    }

    /// Accepted or dialed
    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }

    /// Queue a letter; returns it back if the channel task is gone
    pub fn enqueue(&self, letter: Letter) -> Result<(), Letter> {
        self.tx
            .send(ChannelCommand::Enqueue(letter))
            .map_err(|e| match e.0 {
                ChannelCommand::Enqueue(letter) => letter,
                _ => unreachable!(),
            })
    }

    /// Heartbeat tick
    pub fn poke(&self) {
        let _ = self.tx.send(ChannelCommand::Poke);
    }

    /// Request a graceful shutdown
    pub fn disconnect(&self) {
        let _ = self.tx.send(ChannelCommand::Disconnect);
    }
}

/// Spawn the task for an accepted connection
pub fn spawn_inbound(
    stream: TcpStream,
    config: ChannelConfig,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    token: CancellationToken,
) -> std::io::Result<ChannelHandle> {
    let binding = stream.peer_addr()?;
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        info!("inbound channel from {} starting", binding);
        let (reason, remote_node) =
            run_connection(stream, binding, &config, &mut cmd_rx, &event_tx, &token).await;
        cmd_rx.close();
        drain_commands(&mut cmd_rx, binding, &event_tx);
        info!("inbound channel from {} ended: {}", binding, reason);
        let _ = event_tx.send(ChannelEvent::Disconnected {
            binding,
            remote_node,
            reason,
        });
    });

    Ok(ChannelHandle::new(binding, ChannelDirection::Inbound, cmd_tx))
}

/// Spawn the task for a dialed connection
///
/// The task redials after transient disconnects, resetting the backoff on
/// every successful dial, and ends only on a disconnect request or
/// cancellation.
pub fn spawn_outbound(
    binding: SocketAddr,
    config: ChannelConfig,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    token: CancellationToken,
) -> ChannelHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut backoff = config.backoff_initial;

        'redial: loop {
            if token.is_cancelled() {
                break;
            }
            let _ = event_tx.send(ChannelEvent::Connecting { binding });

            let dialed = tokio::select! {
                _ = token.cancelled() => break 'redial,
                res = TcpStream::connect(binding) => res,
            };

            match dialed {
                Ok(stream) => {
                    backoff = config.backoff_initial;
                    let (reason, remote_node) =
                        run_connection(stream, binding, &config, &mut cmd_rx, &event_tx, &token)
                            .await;
                    info!("outbound channel to {} ended: {}", binding, reason);
                    let _ = event_tx.send(ChannelEvent::Disconnected {
                        binding,
                        remote_node,
                        reason,
                    });
                    if reason == DisconnectReason::Requested || token.is_cancelled() {
                        break 'redial;
                    }
                }
                Err(e) => {
                    warn!("failed to dial {}: {}; retrying in {:?}", binding, e, backoff);
                }
            }

            // Backoff before the next dial, failing letters that arrive in
            // the meantime so the socket can requeue or discard them.
            let delay = jittered(backoff);
            backoff = (backoff * 2).min(config.backoff_max);
            let wait = tokio::time::sleep(delay);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break 'redial,
                    _ = &mut wait => break,
                    cmd = cmd_rx.recv() => match cmd {
                        None => break 'redial,
                        Some(ChannelCommand::Enqueue(letter)) => {
                            let _ = event_tx.send(ChannelEvent::FailedToSend { binding, letter });
                        }
                        Some(ChannelCommand::Disconnect) => {
                            let _ = event_tx.send(ChannelEvent::Disconnected {
                                binding,
                                remote_node: None,
                                reason: DisconnectReason::Requested,
                            });
                            break 'redial;
                        }
                        Some(ChannelCommand::Poke) => {}
                    },
                }
            }
        }

        cmd_rx.close();
        drain_commands(&mut cmd_rx, binding, &event_tx);
    });

    ChannelHandle::new(binding, ChannelDirection::Outbound, cmd_tx)
}

struct InFlight {
    letter: Letter,
    deadline: Instant,
}

struct ChannelState {
    user_queue: VecDeque<Letter>,
    ack_queue: VecDeque<Letter>,
    in_flight: Option<InFlight>,
    available: bool,
    last_in: Instant,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            user_queue: VecDeque::new(),
            ack_queue: VecDeque::new(),
            in_flight: None,
            available: true,
            last_in: Instant::now(),
        }
    }

    fn is_drained(&self) -> bool {
        self.user_queue.is_empty() && self.ack_queue.is_empty() && self.in_flight.is_none()
    }
}

/// Run one established connection to completion
async fn run_connection(
    stream: TcpStream,
    binding: SocketAddr,
    config: &ChannelConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    token: &CancellationToken,
) -> (DisconnectReason, Option<NodeId>) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut receiver = Receiver::new(read_half);
    let mut transmitter = Transmitter::new(write_half);

    // Handshake: send our initialize, then wait for the peer's.
    if send_initialize(&mut transmitter, config.node_id).await.is_err() {
        return (DisconnectReason::Handshake, None);
    }
    let remote_node = tokio::select! {
        _ = token.cancelled() => return (DisconnectReason::Requested, None),
        res = await_initialize(&mut receiver, config.initialization_timeout) => match res {
            Ok(node) => node,
            Err(HandshakeError::Timeout) => {
                warn!("initialize from {} timed out", binding);
                return (DisconnectReason::Handshake, None);
            }
            Err(e) => {
                warn!("initialize from {} failed: {}", binding, e);
                return (DisconnectReason::Handshake, None);
            }
        },
    };

    info!("channel {} initialized, peer node {}", binding, remote_node);
    let _ = event_tx.send(ChannelEvent::Initialized {
        binding,
        remote_node,
    });
    let _ = event_tx.send(ChannelEvent::Available { binding });

    let mut st = ChannelState::new();
    let liveness = config.heartbeat_interval * config.heartbeat_max_missed;

    let reason = loop {
        let ack_deadline = st
            .in_flight
            .as_ref()
            .map(|f| f.deadline)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                let _ = transmitter.transmit(&Letter::shutdown()).await;
                break DisconnectReason::Requested;
            }

            cmd = cmd_rx.recv() => match cmd {
                None => {
                    let _ = transmitter.transmit(&Letter::shutdown()).await;
                    break DisconnectReason::Requested;
                }
                Some(ChannelCommand::Enqueue(letter)) => {
                    st.available = false;
                    st.user_queue.push_back(letter);
                }
                Some(ChannelCommand::Poke) => {
                    if st.last_in.elapsed() >= liveness {
                        warn!("channel {} missed its liveness deadline", binding);
                        break DisconnectReason::Socket;
                    }
                    if st.is_drained() && transmitter.idle_for() >= config.heartbeat_interval {
                        debug!("channel {} idle, sending heartbeat", binding);
                        if transmitter.transmit(&Letter::heartbeat()).await.is_err() {
                            break DisconnectReason::Socket;
                        }
                    }
                }
                Some(ChannelCommand::Disconnect) => {
                    let _ = transmitter.transmit(&Letter::shutdown()).await;
                    break DisconnectReason::Requested;
                }
            },

            received = receiver.recv() => match received {
                Ok(letter) => {
                    st.last_in = Instant::now();
                    if let Some(reason) = handle_inbound(letter, binding, remote_node, &mut st, event_tx) {
                        break reason;
                    }
                }
                Err(ReceiveError::Closed) => {
                    debug!("channel {} closed by peer", binding);
                    break DisconnectReason::Socket;
                }
                Err(e) => {
                    warn!("channel {} read failed: {}", binding, e);
                    break DisconnectReason::Socket;
                }
            },

            _ = tokio::time::sleep_until(ack_deadline), if st.in_flight.is_some() => {
                let in_flight = st.in_flight.take().unwrap();
                warn!("channel {} ack timed out for letter {:?}", binding, in_flight.letter.id);
                let _ = event_tx.send(ChannelEvent::FailedToSend {
                    binding,
                    letter: in_flight.letter,
                });
                break DisconnectReason::AckTimeout;
            }
        }

        if let Err(reason) = drive_writes(&mut st, &mut transmitter, binding, event_tx, config).await
        {
            break reason;
        }

        if !st.available && st.is_drained() {
            st.available = true;
            let _ = event_tx.send(ChannelEvent::Available { binding });
        }
    };

    debug!(
        "channel {} closing after {} letters / {} bytes out, {} letters / {} bytes in, \
         last write {:?} ago, last read {:?} ago",
        binding,
        transmitter.letters_out(),
        transmitter.bytes_out(),
        receiver.letters_in(),
        receiver.bytes_in(),
        transmitter.idle_for(),
        receiver.idle_for(),
    );
    fail_pending(&mut st, binding, event_tx);
    (reason, Some(remote_node))
}

/// Process one decoded letter; returns a reason when the channel must close
fn handle_inbound(
    letter: Letter,
    binding: SocketAddr,
    remote_node: NodeId,
    st: &mut ChannelState,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
) -> Option<DisconnectReason> {
    match letter.kind {
        LetterKind::Ack => {
            let resolved = st
                .in_flight
                .as_ref()
                .is_some_and(|f| f.letter.id == letter.id);
            if resolved {
                let in_flight = st.in_flight.take().unwrap();
                let _ = event_tx.send(ChannelEvent::Sent {
                    binding,
                    letter: in_flight.letter,
                });
            } else {
                debug!("channel {} got ack {:?} with nothing in flight", binding, letter.id);
            }
            None
        }
        LetterKind::Heartbeat => None,
        LetterKind::Shutdown => {
            debug!("channel {} received shutdown", binding);
            Some(DisconnectReason::Remote)
        }
        LetterKind::Initialize => {
            debug!("channel {} ignoring repeated initialize", binding);
            None
        }
        LetterKind::Batch => {
            // Parts are full frames. Inner letters are delivered one by one
            // and never acknowledged; the outer batch travels with NO_ACK.
            for part in letter.parts {
                match decode_frame(part.data) {
                    Ok(inner) => {
                        let _ = event_tx.send(ChannelEvent::Received {
                            binding,
                            remote_node,
                            letter: inner,
                        });
                    }
                    Err(e) => {
                        warn!("channel {} malformed batch part: {}", binding, e);
                        return Some(DisconnectReason::Socket);
                    }
                }
            }
            None
        }
        LetterKind::User => {
            let reply_ack = letter.wants_reply_ack().then(|| letter.id).flatten();
            let _ = event_tx.send(ChannelEvent::Received {
                binding,
                remote_node,
                letter,
            });
            // The ack goes out after Received fires, ahead of queued user
            // letters.
            if let Some(id) = reply_ack {
                st.available = false;
                st.ack_queue.push_back(Letter::ack(id));
            }
            None
        }
    }
}

/// Write queued letters until the queue drains or a letter occupies the
/// in-flight slot
async fn drive_writes(
    st: &mut ChannelState,
    transmitter: &mut Transmitter<OwnedWriteHalf>,
    binding: SocketAddr,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    config: &ChannelConfig,
) -> Result<(), DisconnectReason> {
    while st.in_flight.is_none() {
        let next = match st.ack_queue.pop_front().or_else(|| st.user_queue.pop_front()) {
            Some(letter) => letter,
            None => break,
        };

        if let Err(e) = transmitter.transmit(&next).await {
            warn!("channel {} write failed: {}", binding, e);
            if matters_to_sender(&next) {
                let _ = event_tx.send(ChannelEvent::FailedToSend {
                    binding,
                    letter: next,
                });
            }
            return Err(DisconnectReason::Socket);
        }

        if matters_to_sender(&next) {
            if next.requires_ack() {
                st.in_flight = Some(InFlight {
                    letter: next,
                    deadline: Instant::now() + config.ack_timeout,
                });
            } else {
                let _ = event_tx.send(ChannelEvent::Sent {
                    binding,
                    letter: next,
                });
            }
        }
    }
    Ok(())
}

/// Whether delivery of this letter is reported to the socket
fn matters_to_sender(letter: &Letter) -> bool {
    matches!(letter.kind, LetterKind::User | LetterKind::Batch)
}

/// Convert everything still queued or in flight into failure events
fn fail_pending(
    st: &mut ChannelState,
    binding: SocketAddr,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
) {
    if let Some(in_flight) = st.in_flight.take() {
        let _ = event_tx.send(ChannelEvent::FailedToSend {
            binding,
            letter: in_flight.letter,
        });
    }
    st.ack_queue.clear();
    for letter in st.user_queue.drain(..) {
        let _ = event_tx.send(ChannelEvent::FailedToSend { binding, letter });
    }
}

/// Fail letters that were queued behind a closed channel task
fn drain_commands(
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    binding: SocketAddr,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
) {
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let ChannelCommand::Enqueue(letter) = cmd {
            let _ = event_tx.send(ChannelEvent::FailedToSend { binding, letter });
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let half = (delay.as_millis() / 2) as u64;
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperletter_wire::LetterOptions;
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn recv_event(
        rx: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> ChannelEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for channel event")
            .expect("event stream closed")
    }

    struct Peer {
        transmitter: Transmitter<OwnedWriteHalf>,
        receiver: Receiver<OwnedReadHalf>,
        node: NodeId,
    }

    /// Accept one connection and complete the handshake by hand
    async fn accepted_peer(listener: &TcpListener) -> Peer {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut transmitter = Transmitter::new(write_half);
        let mut receiver = Receiver::new(read_half);

        let node = NodeId::new_v4();
        send_initialize(&mut transmitter, node).await.unwrap();
        await_initialize(&mut receiver, Duration::from_secs(2))
            .await
            .unwrap();

        Peer {
            transmitter,
            receiver,
            node,
        }
    }

    fn test_config() -> ChannelConfig {
        ChannelConfig {
            ack_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_max_missed: 3,
            backoff_initial: Duration::from_millis(20),
            backoff_max: Duration::from_millis(100),
            ..ChannelConfig::default()
        }
    }

    #[tokio::test]
    async fn test_outbound_initializes_and_sends_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handle = spawn_outbound(addr, test_config(), event_tx, token.clone());
        let mut peer = accepted_peer(&listener).await;

        assert!(matches!(recv_event(&mut events).await, ChannelEvent::Connecting { .. }));
        match recv_event(&mut events).await {
            ChannelEvent::Initialized { remote_node, .. } => assert_eq!(remote_node, peer.node),
            other => panic!("expected Initialized, got {:?}", other),
        }
        assert!(matches!(recv_event(&mut events).await, ChannelEvent::Available { .. }));

        handle
            .enqueue(Letter::user(LetterOptions::empty(), "first"))
            .unwrap();
        handle
            .enqueue(Letter::user(LetterOptions::empty(), "second"))
            .unwrap();

        let first = timeout(Duration::from_secs(2), peer.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.parts[0].data.as_ref(), b"first");
        let second = timeout(Duration::from_secs(2), peer.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.parts[0].data.as_ref(), b"second");

        // two Sent events, then Available again
        let mut sent = Vec::new();
        loop {
            match recv_event(&mut events).await {
                ChannelEvent::Sent { letter, .. } => sent.push(letter),
                ChannelEvent::Available { .. } if sent.len() == 2 => break,
                ChannelEvent::Available { .. } => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(sent[0].parts[0].data.as_ref(), b"first");
        assert_eq!(sent[1].parts[0].data.as_ref(), b"second");

        token.cancel();
    }

    #[tokio::test]
    async fn test_sent_waits_for_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handle = spawn_outbound(addr, test_config(), event_tx, token.clone());
        let mut peer = accepted_peer(&listener).await;

        // skip Connecting / Initialized / Available
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        let mut letter = Letter::user(LetterOptions::ACK, "needs ack");
        letter.ensure_id();
        let id = letter.id.unwrap();
        handle.enqueue(letter).unwrap();

        let received = timeout(Duration::from_secs(2), peer.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, Some(id));

        // no Sent before the ack goes back
        assert!(
            timeout(Duration::from_millis(50), events.recv()).await.is_err(),
            "Sent fired before the ack arrived"
        );

        peer.transmitter.transmit(&Letter::ack(id)).await.unwrap();
        match recv_event(&mut events).await {
            ChannelEvent::Sent { letter, .. } => assert_eq!(letter.id, Some(id)),
            other => panic!("expected Sent, got {:?}", other),
        }

        token.cancel();
    }

    #[tokio::test]
    async fn test_ack_timeout_fails_letter_and_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handle = spawn_outbound(addr, test_config(), event_tx, token.clone());
        let mut peer = accepted_peer(&listener).await;
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        let mut letter = Letter::user(LetterOptions::ACK, "dropped ack");
        letter.ensure_id();
        handle.enqueue(letter).unwrap();

        // the peer reads the letter but never acknowledges it
        let _ = timeout(Duration::from_secs(2), peer.receiver.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            recv_event(&mut events).await,
            ChannelEvent::FailedToSend { .. }
        ));
        match recv_event(&mut events).await {
            ChannelEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::AckTimeout)
            }
            other => panic!("expected Disconnected, got {:?}", other),
        }

        token.cancel();
    }

    #[tokio::test]
    async fn test_received_user_letter_is_acked_with_priority() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let _handle = spawn_outbound(addr, test_config(), event_tx, token.clone());
        let mut peer = accepted_peer(&listener).await;
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        let mut letter = Letter::user(LetterOptions::ACK, "ack me");
        letter.ensure_id();
        let id = letter.id.unwrap();
        peer.transmitter.transmit(&letter).await.unwrap();

        match recv_event(&mut events).await {
            ChannelEvent::Received { letter, .. } => assert_eq!(letter.id, Some(id)),
            other => panic!("expected Received, got {:?}", other),
        }

        let ack = timeout(Duration::from_secs(2), peer.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.kind, LetterKind::Ack);
        assert_eq!(ack.id, Some(id));

        token.cancel();
    }

    #[tokio::test]
    async fn test_liveness_deadline_disconnects_on_poke() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let config = test_config();
        let liveness = config.heartbeat_interval * config.heartbeat_max_missed;
        let handle = spawn_outbound(addr, config, event_tx, token.clone());
        let peer = accepted_peer(&listener).await;
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        // peer goes silent; keep poking past the liveness deadline
        tokio::time::sleep(liveness + Duration::from_millis(20)).await;
        handle.poke();

        match recv_event(&mut events).await {
            ChannelEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::Socket)
            }
            other => panic!("expected Disconnected, got {:?}", other),
        }

        drop(peer);
        token.cancel();
    }

    #[tokio::test]
    async fn test_idle_poke_emits_heartbeat() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let config = test_config();
        let handle = spawn_outbound(addr, config.clone(), event_tx, token.clone());
        let mut peer = accepted_peer(&listener).await;
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        tokio::time::sleep(config.heartbeat_interval + Duration::from_millis(20)).await;
        handle.poke();

        let heartbeat = timeout(Duration::from_secs(2), peer.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(heartbeat.kind, LetterKind::Heartbeat);

        token.cancel();
    }

    #[tokio::test]
    async fn test_peer_shutdown_reports_remote() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let _handle = spawn_outbound(addr, test_config(), event_tx, token.clone());
        let mut peer = accepted_peer(&listener).await;
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        peer.transmitter.transmit(&Letter::shutdown()).await.unwrap();

        match recv_event(&mut events).await {
            ChannelEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::Remote)
            }
            other => panic!("expected Disconnected, got {:?}", other),
        }

        token.cancel();
    }

    #[tokio::test]
    async fn test_outbound_reconnects_after_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let _handle = spawn_outbound(addr, test_config(), event_tx, token.clone());
        let peer = accepted_peer(&listener).await;
        for _ in 0..3 {
            recv_event(&mut events).await;
        }

        // hard close; the channel should observe Socket and redial
        drop(peer);

        match recv_event(&mut events).await {
            ChannelEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::Socket)
            }
            other => panic!("expected Disconnected, got {:?}", other),
        }
        assert!(matches!(recv_event(&mut events).await, ChannelEvent::Connecting { .. }));

        let second = accepted_peer(&listener).await;
        match recv_event(&mut events).await {
            ChannelEvent::Initialized { remote_node, .. } => {
                assert_eq!(remote_node, second.node)
            }
            other => panic!("expected Initialized, got {:?}", other),
        }

        token.cancel();
    }
}
