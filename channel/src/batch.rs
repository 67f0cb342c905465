//! Batching decorator.
//!
//! Wraps a channel and coalesces queued user letters into a single
//! batch-type letter whose parts are the serialized inner letters. A batch
//! is flushed when the buffer reaches `max_letters_in_batch`, or as soon as
//! the inner channel becomes available while the buffer is non-empty. When
//! letters arrive faster than the wire drains, a flush may extend up to
//! `max_extended_batch_count` letters.
//!
//! Batch letters travel with `NO_ACK`. Inner letters that individually
//! requested an acknowledgement are therefore not acknowledged on the wire;
//! their delivery is reported as-if-each-sent when the enclosing batch
//! succeeds or fails.

use crate::channel::{ChannelCommand, ChannelHandle};
use crate::events::ChannelEvent;
use hyperletter_wire::{encode, Letter, LetterKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Batching thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Whether the decorator is inserted at all
    pub enabled: bool,
    /// Buffer size that forces a flush
    pub max_letters_in_batch: usize,
    /// Ceiling a flush may extend to when letters arrive rapidly
    pub max_extended_batch_count: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_letters_in_batch: 100,
            max_extended_batch_count: 100,
        }
    }
}

struct Batcher {
    inner: ChannelHandle,
    config: BatchConfig,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    buffer: VecDeque<Letter>,
    /// Letters inside the batch currently on the inner channel
    outstanding: Option<Vec<Letter>>,
    inner_ready: bool,
}

/// Spawn a batching decorator over `inner`
///
/// The inner channel must have been spawned with a private event sender;
/// the decorator consumes that stream, rewrites batch outcomes into
/// per-letter outcomes, and forwards everything else to `event_tx`.
pub fn spawn_batching(
    inner: ChannelHandle,
    mut inner_events: mpsc::UnboundedReceiver<ChannelEvent>,
    config: BatchConfig,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    token: CancellationToken,
) -> ChannelHandle {
    let binding = inner.binding();
    let direction = inner.direction();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

    let mut batcher = Batcher {
        inner,
        config,
        event_tx,
        buffer: VecDeque::new(),
        outstanding: None,
        inner_ready: false,
    };

    tokio::spawn(async move {
        loop {
            // Coalesce everything already queued, then flush the remainder
            // if the inner channel is sitting idle. Slow traffic goes out
            // as small batches rather than waiting for the buffer to fill.
            while let Ok(cmd) = cmd_rx.try_recv() {
                batcher.handle_command(cmd);
            }
            if batcher.inner_ready && !batcher.buffer.is_empty() {
                batcher.flush();
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                cmd = cmd_rx.recv() => match cmd {
                    None => break,
                    Some(cmd) => batcher.handle_command(cmd),
                },

                event = inner_events.recv() => match event {
                    None => break,
                    Some(event) => batcher.handle_inner_event(event),
                },
            }
        }
        batcher.fail_buffered();
    });

    ChannelHandle::new(binding, direction, cmd_tx)
}

impl Batcher {
    fn handle_command(&mut self, cmd: ChannelCommand) {
        match cmd {
            ChannelCommand::Enqueue(letter) if letter.kind == LetterKind::User => {
                self.buffer.push_back(letter);
                if self.inner_ready && self.buffer.len() >= self.config.max_letters_in_batch {
                    self.flush();
                }
                self.signal_ready();
            }
            // Control letters bypass the buffer
            ChannelCommand::Enqueue(letter) => {
                if let Err(letter) = self.inner.enqueue(letter) {
                    let _ = self.event_tx.send(ChannelEvent::FailedToSend {
                        binding: self.inner.binding(),
                        letter,
                    });
                }
            }
            ChannelCommand::Poke => self.inner.poke(),
            ChannelCommand::Disconnect => {
                self.fail_buffered();
                self.inner.disconnect();
            }
        }
    }

    fn handle_inner_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Available { .. } => {
                self.inner_ready = true;
                if !self.buffer.is_empty() {
                    self.flush();
                }
                self.signal_ready();
            }
            ChannelEvent::Sent { binding, letter }
                if letter.kind == LetterKind::Batch && self.outstanding.is_some() =>
            {
                for inner_letter in self.outstanding.take().unwrap() {
                    let _ = self.event_tx.send(ChannelEvent::Sent {
                        binding,
                        letter: inner_letter,
                    });
                }
            }
            ChannelEvent::FailedToSend { binding, letter }
                if letter.kind == LetterKind::Batch && self.outstanding.is_some() =>
            {
                for inner_letter in self.outstanding.take().unwrap() {
                    let _ = self.event_tx.send(ChannelEvent::FailedToSend {
                        binding,
                        letter: inner_letter,
                    });
                }
            }
            ChannelEvent::Disconnected { .. } => {
                self.inner_ready = false;
                self.fail_buffered();
                let _ = self.event_tx.send(event);
            }
            other => {
                let _ = self.event_tx.send(other);
            }
        }
    }

    /// Report availability upward while the buffer can still take letters
    fn signal_ready(&self) {
        if self.buffer.len() < self.config.max_extended_batch_count {
            let _ = self.event_tx.send(ChannelEvent::Available {
                binding: self.inner.binding(),
            });
        }
    }

    fn flush(&mut self) {
        let take = self.buffer.len().min(self.config.max_extended_batch_count);
        let mut letters = Vec::with_capacity(take);
        let mut encoded = Vec::with_capacity(take);
        for _ in 0..take {
            let letter = self.buffer.pop_front().unwrap();
            match encode(&letter) {
                Ok(frame) => {
                    encoded.push(frame);
                    letters.push(letter);
                }
                Err(e) => {
                    warn!("dropping unencodable letter from batch: {}", e);
                    let _ = self.event_tx.send(ChannelEvent::FailedToSend {
                        binding: self.inner.binding(),
                        letter,
                    });
                }
            }
        }
        if letters.is_empty() {
            return;
        }

        debug!(
            "flushing batch of {} letters to {}",
            letters.len(),
            self.inner.binding()
        );
        self.inner_ready = false;
        let batch = Letter::batch(encoded);
        match self.inner.enqueue(batch) {
            Ok(()) => self.outstanding = Some(letters),
            Err(_) => {
                for letter in letters {
                    let _ = self.event_tx.send(ChannelEvent::FailedToSend {
                        binding: self.inner.binding(),
                        letter,
                    });
                }
            }
        }
    }

    fn fail_buffered(&mut self) {
        for letter in self.buffer.drain(..) {
            let _ = self.event_tx.send(ChannelEvent::FailedToSend {
                binding: self.inner.binding(),
                letter,
            });
        }
    }
}
