//! Letter data model and wire framing for hyperletter.
//!
//! This crate defines the letter, the unit of application messaging, and
//! the self-delimited frame format letters travel in, together with the
//! serializer and the streaming deserializer used by the channel read loop.
//!
//! ## Wire format
//!
//! All integers are little-endian.
//!
//! ```text
//! +------------------+------------------------------------+
//! | u32 total_length | length of everything that follows  |
//! +------------------+------------------------------------+
//! | u8 options       | letter option bits                 |
//! +------------------+------------------------------------+
//! | u8 type          | letter type code                   |
//! +------------------+------------------------------------+
//! | id (16B, opt)    | present iff options has ACK or     |
//! |                  | UNIQUE_ID                          |
//! +------------------+------------------------------------+
//! | u16 parts_count  | number of parts                    |
//! +------------------+------------------------------------+
//! | per part:        | u8 part_type ‖ u32 part_length ‖   |
//! |                  | part bytes                         |
//! +------------------+------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod letter;

// Re-export main types
pub use codec::{decode_frame, encode, LetterDecoder, DEFAULT_MAX_LETTER_SIZE};
pub use error::WireError;
pub use letter::{Letter, LetterId, LetterKind, LetterOptions, NodeId, Part, PartKind};
