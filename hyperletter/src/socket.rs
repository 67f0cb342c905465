//! The socket façade.
//!
//! Public surface over listeners, channels and the dispatcher. The socket
//! owns every task it starts and tears them all down through one
//! cancellation token on dispose. Registries are keyed by binding for
//! channels and listeners and by node id for reply routing; the node-id map
//! holds a channel exactly while that channel is connected.

use crate::config::SocketConfig;
use crate::dispatcher::{DispatchCommand, Dispatcher};
use crate::error::SocketError;
use crate::events::{emit_discard, SocketEvent, SocketEvents};
use dashmap::DashMap;
use hyperletter_channel::{
    spawn_batching, spawn_inbound, spawn_listener, spawn_outbound, ChannelDirection,
    ChannelEvent, ChannelHandle, DisconnectReason, Heartbeat, ListenerHandle,
};
use hyperletter_wire::{Letter, LetterOptions, NodeId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A hyperletter socket
///
/// Bind listening endpoints and/or dial outbound endpoints, then enqueue
/// letters; delivery outcomes surface on the paired [`SocketEvents`]
/// stream.
#[derive(Debug)]
pub struct Socket {
    config: SocketConfig,
    /// Every live channel, including outbound ones between reconnects
    channels: Arc<DashMap<SocketAddr, ChannelHandle>>,
    listeners: DashMap<SocketAddr, ListenerHandle>,
    dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
    channel_event_tx: mpsc::UnboundedSender<ChannelEvent>,
    accept_tx: mpsc::UnboundedSender<TcpStream>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    routes: Arc<DashMap<NodeId, ChannelHandle>>,
    token: CancellationToken,
    disposed: AtomicBool,
}

impl Socket {
    /// Create a socket and its event stream
    pub fn new(config: SocketConfig) -> (Self, SocketEvents) {
        let token = CancellationToken::new();
        let channels = Arc::new(DashMap::new());
        let connected = Arc::new(DashMap::new());
        let routes = Arc::new(DashMap::new());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (channel_event_tx, channel_event_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();

        tokio::spawn(
            Dispatcher::new(
                connected.clone(),
                event_tx.clone(),
                dispatch_rx,
                token.clone(),
            )
            .run(),
        );

        Heartbeat::spawn(channels.clone(), config.heartbeat.interval, token.clone());

        let driver = Driver {
            config: config.clone(),
            channels: channels.clone(),
            connected,
            routes: routes.clone(),
            dispatch_tx: dispatch_tx.clone(),
            event_tx: event_tx.clone(),
            channel_event_tx: channel_event_tx.clone(),
            token: token.clone(),
        };
        tokio::spawn(driver.run(channel_event_rx, accept_rx));

        info!("socket {} created", config.node_id);
        let socket = Self {
            config,
            channels,
            listeners: DashMap::new(),
            dispatch_tx,
            channel_event_tx,
            accept_tx,
            event_tx,
            routes,
            token,
            disposed: AtomicBool::new(false),
        };
        (socket, SocketEvents { rx: event_rx })
    }

    /// The node id this socket advertises
    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Start listening on an endpoint; idempotent per binding
    ///
    /// Returns the actual bound address, which differs from the request
    /// when port zero was asked for.
    pub async fn bind(&self, addr: SocketAddr) -> Result<SocketAddr, SocketError> {
        self.ensure_live()?;
        if let Some(existing) = self.listeners.get(&addr) {
            return Ok(existing.binding());
        }
        let handle = spawn_listener(addr, self.accept_tx.clone(), &self.token)
            .await
            .map_err(|source| SocketError::Bind { addr, source })?;
        let bound = handle.binding();
        self.listeners.insert(bound, handle);
        Ok(bound)
    }

    /// Stop listening on an endpoint; already-accepted channels continue
    pub fn unbind(&self, addr: SocketAddr) {
        if let Some((_, listener)) = self.listeners.remove(&addr) {
            listener.stop();
        }
    }

    /// Start an outbound channel; idempotent per binding
    ///
    /// The channel dials, redials with backoff on failure, and lives until
    /// [`disconnect`](Self::disconnect) or [`dispose`](Self::dispose).
    pub fn connect(&self, binding: SocketAddr) -> Result<(), SocketError> {
        self.ensure_live()?;
        if binding.port() == 0 {
            return Err(SocketError::InvalidBinding(binding));
        }
        if self.channels.contains_key(&binding) {
            return Ok(());
        }
        let handle = outbound_channel(
            binding,
            &self.config,
            &self.channel_event_tx,
            &self.token,
        );
        self.channels.insert(binding, handle);
        Ok(())
    }

    /// Request a graceful shutdown of the matching channel; asynchronous
    pub fn disconnect(&self, binding: SocketAddr) {
        if let Some(channel) = self.channels.get(&binding) {
            channel.value().disconnect();
        }
    }

    /// Hand a letter to the dispatcher
    ///
    /// The dispatcher matches it against the next available channel, or
    /// fans it out to every connected channel when the options say
    /// multicast. Multicast strips the ack bit; the two are mutually
    /// exclusive.
    pub fn send(&self, mut letter: Letter) -> Result<(), SocketError> {
        self.ensure_live()?;
        if letter.is_multicast() {
            letter.options.remove(LetterOptions::ACK);
        }
        letter.ensure_id();
        self.dispatch_tx
            .send(DispatchCommand::Send(letter))
            .map_err(|_| SocketError::QueueClosed)
    }

    /// Route a letter to the channel whose peer advertised `node`
    ///
    /// With no such route the letter is discarded. This includes the window
    /// between an outbound disconnect and its re-initialization.
    pub fn send_to(&self, mut letter: Letter, node: NodeId) -> Result<(), SocketError> {
        self.ensure_live()?;
        letter.ensure_id();
        let handle = self.routes.get(&node).map(|entry| entry.value().clone());
        match handle {
            Some(handle) => {
                if let Err(letter) = handle.enqueue(letter) {
                    emit_discard(&self.event_tx, Some(handle.binding()), letter);
                }
            }
            None => {
                debug!("no route to node {}, discarding letter", node);
                emit_discard(&self.event_tx, None, letter);
            }
        }
        Ok(())
    }

    /// Tear everything down: listeners stop, channels disconnect, the
    /// heartbeat and dispatcher exit, and `Disposed` fires
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing socket {}", self.config.node_id);
        self.token.cancel();
        for listener in self.listeners.iter() {
            listener.value().stop();
        }
        self.listeners.clear();
        let _ = self.event_tx.send(SocketEvent::Disposed);
    }

    fn ensure_live(&self) -> Result<(), SocketError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SocketError::QueueClosed);
        }
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Build an outbound channel, wrapped in the batching decorator when
/// enabled
fn outbound_channel(
    binding: SocketAddr,
    config: &SocketConfig,
    event_tx: &mpsc::UnboundedSender<ChannelEvent>,
    token: &CancellationToken,
) -> ChannelHandle {
    if config.batch.enabled {
        let (inner_tx, inner_rx) = mpsc::unbounded_channel();
        let inner = spawn_outbound(binding, config.channel_config(), inner_tx, token.clone());
        spawn_batching(
            inner,
            inner_rx,
            config.batch.clone(),
            event_tx.clone(),
            token.clone(),
        )
    } else {
        spawn_outbound(binding, config.channel_config(), event_tx.clone(), token.clone())
    }
}

/// The socket's internal event loop
///
/// Consumes accepted connections and channel events, maintains the
/// connected and node-id registries, applies the requeue/discard policy
/// and fans the public events out.
struct Driver {
    config: SocketConfig,
    channels: Arc<DashMap<SocketAddr, ChannelHandle>>,
    connected: Arc<DashMap<SocketAddr, ChannelHandle>>,
    routes: Arc<DashMap<NodeId, ChannelHandle>>,
    dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
    channel_event_tx: mpsc::UnboundedSender<ChannelEvent>,
    token: CancellationToken,
}

impl Driver {
    async fn run(
        self,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut accepted: mpsc::UnboundedReceiver<TcpStream>,
    ) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                Some(stream) = accepted.recv() => self.accept(stream),
                Some(event) = channel_events.recv() => self.on_channel_event(event),
                else => break,
            }
        }
        debug!("socket {} driver stopped", self.config.node_id);
    }

    fn accept(&self, stream: TcpStream) {
        let spawned = if self.config.batch.enabled {
            let (inner_tx, inner_rx) = mpsc::unbounded_channel();
            spawn_inbound(
                stream,
                self.config.channel_config(),
                inner_tx,
                self.token.clone(),
            )
            .map(|inner| {
                spawn_batching(
                    inner,
                    inner_rx,
                    self.config.batch.clone(),
                    self.channel_event_tx.clone(),
                    self.token.clone(),
                )
            })
        } else {
            spawn_inbound(
                stream,
                self.config.channel_config(),
                self.channel_event_tx.clone(),
                self.token.clone(),
            )
        };

        match spawned {
            Ok(handle) => {
                self.channels.insert(handle.binding(), handle);
            }
            Err(e) => warn!("dropping accepted connection: {}", e),
        }
    }

    fn on_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connecting { binding } => {
                let _ = self.event_tx.send(SocketEvent::Connecting { binding });
            }
            ChannelEvent::Initialized {
                binding,
                remote_node,
            } => {
                if let Some(entry) = self.channels.get(&binding) {
                    let handle = entry.value().clone();
                    self.connected.insert(binding, handle.clone());
                    self.routes.insert(remote_node, handle);
                }
                let _ = self.event_tx.send(SocketEvent::Connected {
                    binding,
                    remote_node,
                });
            }
            ChannelEvent::Available { binding } => {
                let _ = self.dispatch_tx.send(DispatchCommand::Ready(binding));
            }
            ChannelEvent::Received {
                binding,
                remote_node,
                letter,
            } => {
                let _ = self.event_tx.send(SocketEvent::Received {
                    binding,
                    from: remote_node,
                    letter,
                });
            }
            ChannelEvent::Sent { binding, letter } => {
                let _ = self.event_tx.send(SocketEvent::Sent { binding, letter });
            }
            ChannelEvent::FailedToSend { binding, letter } => {
                self.on_failed_to_send(binding, letter);
            }
            ChannelEvent::Disconnected {
                binding,
                remote_node,
                reason,
            } => {
                self.connected.remove(&binding);
                if let Some(node) = remote_node {
                    // Single writer per key: only the channel that put the
                    // route there may take it out.
                    self.routes
                        .remove_if(&node, |_, handle| handle.binding() == binding);
                }
                let _ = self.dispatch_tx.send(DispatchCommand::Forget(binding));

                let terminal = reason == DisconnectReason::Requested
                    || self
                        .channels
                        .get(&binding)
                        .map(|entry| entry.value().direction() == ChannelDirection::Inbound)
                        .unwrap_or(false);
                if terminal {
                    self.channels.remove(&binding);
                }

                let _ = self
                    .event_tx
                    .send(SocketEvent::Disconnected { binding, reason });
            }
        }
    }

    /// Requeue or discard per the letter's options
    ///
    /// Partial multicast failures never requeue.
    fn on_failed_to_send(&self, binding: SocketAddr, letter: Letter) {
        if letter.is_multicast() {
            emit_discard(&self.event_tx, Some(binding), letter);
        } else if letter.options.contains(LetterOptions::REQUEUE) {
            debug!("requeueing letter {:?} after failure on {}", letter.id, binding);
            let _ = self.event_tx.send(SocketEvent::Requeued {
                letter: letter.clone(),
            });
            let _ = self.dispatch_tx.send(DispatchCommand::Requeue(letter));
        } else {
            emit_discard(&self.event_tx, Some(binding), letter);
        }
    }
}
