//! Letter frame encoding and streaming decoding.
//!
//! The serializer produces one contiguous frame per letter. The decoder is
//! incremental: it accepts arbitrary chunks from the socket, buffers until
//! the length prefix is satisfied, and yields one letter per complete frame.

use crate::letter::{Letter, LetterKind, LetterOptions, Part, PartKind};
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Maximum accepted frame length (64 MiB)
pub const DEFAULT_MAX_LETTER_SIZE: usize = 64 * 1024 * 1024;

/// Encode a letter to a contiguous wire frame
pub fn encode(letter: &Letter) -> Result<Bytes, WireError> {
    if letter.parts.len() > u16::MAX as usize {
        return Err(WireError::Malformed);
    }

    let carries_id = letter.options.carries_id();
    if carries_id && letter.id.is_none() {
        return Err(WireError::Malformed);
    }

    let mut body_len = 1 + 1 + 2; // options + type + parts_count
    if carries_id {
        body_len += 16;
    }
    for part in &letter.parts {
        if part.data.len() > u32::MAX as usize {
            return Err(WireError::Size(part.data.len()));
        }
        body_len += 1 + 4 + part.data.len();
    }

    let mut buf = BytesMut::with_capacity(4 + body_len);
    buf.put_u32_le(body_len as u32);
    buf.put_u8(letter.options.bits());
    buf.put_u8(letter.kind as u8);
    if carries_id {
        // checked above
        buf.put_slice(letter.id.as_ref().map(Uuid::as_bytes).unwrap());
    }
    buf.put_u16_le(letter.parts.len() as u16);
    for part in &letter.parts {
        buf.put_u8(part.kind as u8);
        buf.put_u32_le(part.data.len() as u32);
        buf.put_slice(&part.data);
    }

    Ok(buf.freeze())
}

/// Streaming letter decoder
#[derive(Debug)]
pub struct LetterDecoder {
    max_letter_size: usize,
}

impl LetterDecoder {
    /// Create a decoder with the default size limit
    pub fn new() -> Self {
        Self {
            max_letter_size: DEFAULT_MAX_LETTER_SIZE,
        }
    }

    /// Create a decoder with an explicit size limit
    pub fn with_max_size(max_letter_size: usize) -> Self {
        Self { max_letter_size }
    }

    /// Decode one letter from the buffer, or `None` if the frame is not yet
    /// complete
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Letter>, WireError> {
        // Need the length prefix first
        if buf.len() < 4 {
            return Ok(None);
        }

        let body_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if body_len > self.max_letter_size {
            return Err(WireError::Size(body_len));
        }
        if buf.len() < 4 + body_len {
            return Ok(None);
        }

        buf.advance(4);
        let mut frame = buf.split_to(body_len).freeze();

        let letter = decode_body(&mut frame)?;
        if !frame.is_empty() {
            return Err(WireError::Malformed);
        }
        Ok(Some(letter))
    }
}

impl Default for LetterDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a complete frame body into a letter
///
/// Also used to unpack batch parts, which hold full frames including the
/// length prefix.
pub fn decode_frame(mut frame: Bytes) -> Result<Letter, WireError> {
    if frame.len() < 4 {
        return Err(WireError::Malformed);
    }
    let body_len = frame.get_u32_le() as usize;
    if frame.len() != body_len {
        return Err(WireError::Malformed);
    }
    let letter = decode_body(&mut frame)?;
    if !frame.is_empty() {
        return Err(WireError::Malformed);
    }
    Ok(letter)
}

fn decode_body(frame: &mut Bytes) -> Result<Letter, WireError> {
    if frame.len() < 2 {
        return Err(WireError::Malformed);
    }

    let option_bits = frame.get_u8();
    let options =
        LetterOptions::from_bits(option_bits).ok_or(WireError::Options(option_bits))?;
    let kind = LetterKind::try_from(frame.get_u8())?;

    let id = if options.carries_id() {
        if frame.len() < 16 {
            return Err(WireError::Malformed);
        }
        let raw = frame.split_to(16);
        Some(Uuid::from_slice(&raw).map_err(|_| WireError::Malformed)?)
    } else {
        None
    };

    if frame.len() < 2 {
        return Err(WireError::Malformed);
    }
    let parts_count = frame.get_u16_le() as usize;

    let mut parts = Vec::with_capacity(parts_count.min(1024));
    for _ in 0..parts_count {
        if frame.len() < 5 {
            return Err(WireError::Malformed);
        }
        let part_kind = PartKind::try_from(frame.get_u8())?;
        let part_len = frame.get_u32_le() as usize;
        if frame.len() < part_len {
            return Err(WireError::Malformed);
        }
        parts.push(Part {
            kind: part_kind,
            data: frame.split_to(part_len),
        });
    }

    let letter = Letter {
        kind,
        options,
        id,
        parts,
    };
    letter.validate()?;
    Ok(letter)
}
