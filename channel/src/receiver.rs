//! Letter reader for one connection.
//!
//! Fills a read buffer from the socket and yields fully-decoded letters via
//! the streaming decoder.

use bytes::BytesMut;
use hyperletter_wire::{Letter, LetterDecoder, WireError};
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Errors the read loop stops on
#[derive(Error, Debug)]
pub enum ReceiveError {
    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// Transport failure
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream did not frame a valid letter
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Decodes letters from a read half
#[derive(Debug)]
pub struct Receiver<R> {
    reader: R,
    decoder: LetterDecoder,
    buf: BytesMut,
    letters_in: u64,
    bytes_in: u64,
    last_read: Instant,
}

impl<R: AsyncRead + Unpin> Receiver<R> {
    /// Wrap a read half
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: LetterDecoder::new(),
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            letters_in: 0,
            bytes_in: 0,
            last_read: Instant::now(),
        }
    }

    /// Read the next letter
    ///
    /// Drains buffered frames before touching the socket, so a chunk that
    /// carried several letters yields them all.
    pub async fn recv(&mut self) -> Result<Letter, ReceiveError> {
        loop {
            if let Some(letter) = self.decoder.decode(&mut self.buf)? {
                self.letters_in += 1;
                self.last_read = Instant::now();
                return Ok(letter);
            }

            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ReceiveError::Closed);
            }
            self.bytes_in += n as u64;
        }
    }

    /// Letters decoded so far
    pub fn letters_in(&self) -> u64 {
        self.letters_in
    }

    /// Bytes read so far
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Time since the last decoded letter
    pub fn idle_for(&self) -> Duration {
        self.last_read.elapsed()
    }
}
