//! Letter writer for one connection.
//!
//! Writes one letter at a time; the channel drives it from the write side of
//! its loop and turns outcomes into events.

use hyperletter_wire::{encode, Letter};
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Serializes letters onto a write half, one at a time
#[derive(Debug)]
pub struct Transmitter<W> {
    writer: W,
    letters_out: u64,
    bytes_out: u64,
    last_write: Instant,
}

impl<W: AsyncWrite + Unpin> Transmitter<W> {
    /// Wrap a write half
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            letters_out: 0,
            bytes_out: 0,
            last_write: Instant::now(),
        }
    }

    /// Encode and write one letter, returning once the bytes have been
    /// handed to the OS
    pub async fn transmit(&mut self, letter: &Letter) -> io::Result<()> {
        let frame =
            encode(letter).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(&frame).await?;
        self.letters_out += 1;
        self.bytes_out += frame.len() as u64;
        self.last_write = Instant::now();
        Ok(())
    }

    /// Time since the last completed write
    pub fn idle_for(&self) -> Duration {
        self.last_write.elapsed()
    }

    /// Letters written so far
    pub fn letters_out(&self) -> u64 {
        self.letters_out
    }

    /// Bytes written so far
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }
}
