//! The letter data model.
//!
//! A letter is a typed, option-bearing container of ordered byte parts. All
//! traffic between peers is expressed as letters: user payloads,
//! acknowledgements, heartbeats, the initialize handshake and batch
//! envelopes.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 16-byte identifier a socket advertises during the initialize handshake
pub type NodeId = Uuid;

/// 16-byte letter identifier, present when acknowledgement or a unique id
/// was requested
pub type LetterId = Uuid;

/// Letter types as carried on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LetterKind {
    /// Handshake letter carrying the sender's node id
    Initialize = 1,
    /// Graceful close notification
    Shutdown = 2,
    /// Application payload
    User = 4,
    /// Acknowledgement echoing a received letter's id
    Ack = 8,
    /// Liveness probe, consumed silently by the receiver
    Heartbeat = 16,
    /// Envelope whose parts are fully-serialized letters
    Batch = 32,
}

impl TryFrom<u8> for LetterKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(LetterKind::Initialize),
            2 => Ok(LetterKind::Shutdown),
            4 => Ok(LetterKind::User),
            8 => Ok(LetterKind::Ack),
            16 => Ok(LetterKind::Heartbeat),
            32 => Ok(LetterKind::Batch),
            _ => Err(crate::WireError::Kind(value)),
        }
    }
}

bitflags! {
    /// Letter option bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LetterOptions: u8 {
        /// Sender wants an acknowledgement before `Sent` fires
        const ACK = 1;
        /// Receiver delivers the letter but sends no acknowledgement
        const SILENT_ACK = 2;
        /// Fan out to every connected channel
        const MULTICAST = 4;
        /// Re-enter the dispatcher on delivery failure
        const REQUEUE = 8;
        /// Suppress the `Discarded` event on final drop
        const SILENT_DISCARD = 16;
        /// Never acknowledge, overrides `ACK`
        const NO_ACK = 32;
        /// Assign an id even without `ACK`
        const UNIQUE_ID = 64;
    }
}

impl LetterOptions {
    /// Whether the wire frame carries the 16-byte id field
    pub fn carries_id(self) -> bool {
        self.intersects(LetterOptions::ACK | LetterOptions::UNIQUE_ID)
    }
}

/// Part types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartKind {
    /// Application bytes
    User = 0,
    /// 16-byte node id, used by initialize letters
    NodeId = 1,
    /// A fully-serialized inner letter, used by batch letters
    Batch = 2,
}

impl TryFrom<u8> for PartKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PartKind::User),
            1 => Ok(PartKind::NodeId),
            2 => Ok(PartKind::Batch),
            _ => Err(crate::WireError::Part(value)),
        }
    }
}

/// One ordered byte blob inside a letter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part type
    pub kind: PartKind,
    /// Raw bytes
    pub data: Bytes,
}

impl Part {
    /// Create a user part
    pub fn user(data: impl Into<Bytes>) -> Self {
        Self {
            kind: PartKind::User,
            data: data.into(),
        }
    }

    /// Create a node-id part
    pub fn node_id(node: NodeId) -> Self {
        Self {
            kind: PartKind::NodeId,
            data: Bytes::copy_from_slice(node.as_bytes()),
        }
    }

    /// Create a batch part from an already-serialized letter
    pub fn batch(encoded: Bytes) -> Self {
        Self {
            kind: PartKind::Batch,
            data: encoded,
        }
    }
}

/// The unit of application messaging
///
/// Immutable once enqueued; the socket assigns the id at enqueue time when
/// the options ask for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    /// Letter type
    pub kind: LetterKind,
    /// Option bits
    pub options: LetterOptions,
    /// Identifier, present when `ACK` or `UNIQUE_ID` is requested
    pub id: Option<LetterId>,
    /// Ordered parts
    pub parts: Vec<Part>,
}

impl Letter {
    /// Create a user letter with a single payload part
    pub fn user(options: LetterOptions, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: LetterKind::User,
            options,
            id: None,
            parts: vec![Part::user(payload)],
        }
    }

    /// Create a user letter with explicit parts
    pub fn with_parts(options: LetterOptions, parts: Vec<Part>) -> Self {
        Self {
            kind: LetterKind::User,
            options,
            id: None,
            parts,
        }
    }

    /// Create the acknowledgement for a received letter id
    pub fn ack(id: LetterId) -> Self {
        Self {
            kind: LetterKind::Ack,
            options: LetterOptions::ACK,
            id: Some(id),
            parts: Vec::new(),
        }
    }

    /// Create a heartbeat letter
    pub fn heartbeat() -> Self {
        Self {
            kind: LetterKind::Heartbeat,
            options: LetterOptions::NO_ACK,
            id: None,
            parts: Vec::new(),
        }
    }

    /// Create the initialize handshake letter for a node
    pub fn initialize(node: NodeId) -> Self {
        Self {
            kind: LetterKind::Initialize,
            options: LetterOptions::NO_ACK,
            id: None,
            parts: vec![Part::node_id(node)],
        }
    }

    /// Create a graceful shutdown letter
    pub fn shutdown() -> Self {
        Self {
            kind: LetterKind::Shutdown,
            options: LetterOptions::NO_ACK,
            id: None,
            parts: Vec::new(),
        }
    }

    /// Create a batch envelope from serialized inner letters
    pub fn batch(encoded: Vec<Bytes>) -> Self {
        Self {
            kind: LetterKind::Batch,
            options: LetterOptions::NO_ACK,
            id: None,
            parts: encoded.into_iter().map(Part::batch).collect(),
        }
    }

    /// Assign an id if the options request one and none is set yet
    pub fn ensure_id(&mut self) {
        if self.id.is_none() && self.options.carries_id() {
            self.id = Some(Uuid::new_v4());
        }
    }

    /// Whether the sender must wait for an acknowledgement before `Sent`
    pub fn requires_ack(&self) -> bool {
        self.options.contains(LetterOptions::ACK)
            && !self.options.contains(LetterOptions::NO_ACK)
    }

    /// Whether the receiving channel replies with an acknowledgement
    pub fn wants_reply_ack(&self) -> bool {
        self.kind == LetterKind::User
            && !self.options.intersects(
                LetterOptions::SILENT_ACK | LetterOptions::NO_ACK | LetterOptions::MULTICAST,
            )
    }

    /// Whether the letter fans out to every connected channel
    pub fn is_multicast(&self) -> bool {
        self.options.contains(LetterOptions::MULTICAST)
    }

    /// The node id carried by an initialize letter
    pub fn initialize_node_id(&self) -> Option<NodeId> {
        if self.kind != LetterKind::Initialize || self.parts.len() != 1 {
            return None;
        }
        let part = &self.parts[0];
        if part.kind != PartKind::NodeId {
            return None;
        }
        Uuid::from_slice(&part.data).ok()
    }

    /// Check the structural invariants the decoder enforces: an initialize
    /// letter carries exactly one node-id part, and a batch letter's parts
    /// are all batch parts
    pub fn validate(&self) -> Result<(), crate::WireError> {
        match self.kind {
            LetterKind::Initialize => {
                if self.initialize_node_id().is_none() {
                    return Err(crate::WireError::Malformed);
                }
            }
            LetterKind::Batch => {
                if self.parts.iter().any(|p| p.kind != PartKind::Batch) {
                    return Err(crate::WireError::Malformed);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_conversion() {
        assert_eq!(LetterKind::try_from(1).unwrap(), LetterKind::Initialize);
        assert_eq!(LetterKind::try_from(32).unwrap(), LetterKind::Batch);
        assert!(LetterKind::try_from(3).is_err());
        assert!(LetterKind::try_from(0).is_err());
    }

    #[test]
    fn test_options_carry_id() {
        assert!(LetterOptions::ACK.carries_id());
        assert!(LetterOptions::UNIQUE_ID.carries_id());
        assert!(!LetterOptions::REQUEUE.carries_id());
        assert!(!(LetterOptions::NO_ACK | LetterOptions::MULTICAST).carries_id());
    }

    #[test]
    fn test_ensure_id() {
        let mut plain = Letter::user(LetterOptions::empty(), "x");
        plain.ensure_id();
        assert!(plain.id.is_none());

        let mut acked = Letter::user(LetterOptions::ACK, "x");
        acked.ensure_id();
        assert!(acked.id.is_some());

        let id = acked.id;
        acked.ensure_id();
        assert_eq!(acked.id, id, "ensure_id must not reassign");
    }

    #[test]
    fn test_reply_ack_rules() {
        assert!(Letter::user(LetterOptions::ACK, "x").wants_reply_ack());
        assert!(Letter::user(LetterOptions::empty(), "x").wants_reply_ack());
        assert!(!Letter::user(LetterOptions::SILENT_ACK, "x").wants_reply_ack());
        assert!(!Letter::user(LetterOptions::NO_ACK, "x").wants_reply_ack());
        assert!(!Letter::user(LetterOptions::MULTICAST, "x").wants_reply_ack());
        assert!(!Letter::heartbeat().wants_reply_ack());
        assert!(!Letter::ack(Uuid::new_v4()).wants_reply_ack());
    }

    #[test]
    fn test_initialize_node_id() {
        let node = Uuid::new_v4();
        let letter = Letter::initialize(node);
        assert_eq!(letter.initialize_node_id(), Some(node));
        assert!(letter.validate().is_ok());

        let bogus = Letter {
            kind: LetterKind::Initialize,
            options: LetterOptions::NO_ACK,
            id: None,
            parts: vec![Part::user("not a node id but way too long to parse")],
        };
        assert!(bogus.initialize_node_id().is_none());
        assert!(bogus.validate().is_err());
    }

    #[test]
    fn test_batch_rejects_stray_parts() {
        let letter = Letter {
            kind: LetterKind::Batch,
            options: LetterOptions::NO_ACK,
            id: None,
            parts: vec![Part::user("not a serialized letter")],
        };
        assert!(letter.validate().is_err());
    }
}
