//! CBOR-encoded protocol messages.
//!
//! The frame header names the opcode, so only the inner struct is serialized
//! (no variant tag in CBOR). A frame whose opcode and payload disagree fails
//! to decode instead of being misread.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness).

pub mod authority;
pub mod sync;

use bytes::BufMut;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode, ParticipantId,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Participant to server
    /// Ask for authority over an item
    RequestEquip(authority::RequestEquip),
    /// Ask to release authority over an item
    RequestUnequip(authority::RequestUnequip),
    /// Holder finished releasing an item
    ConfirmRelease(authority::ConfirmRelease),
    /// Ask for a full ledger broadcast
    RequestResync(sync::RequestResync),

    // Server to everyone
    /// Item granted
    AnnounceEquip(authority::AnnounceEquip),
    /// Item released
    AnnounceUnequip(authority::AnnounceUnequip),
    /// Request refused
    AnnounceRejected(authority::AnnounceRejected),
    /// Full ledger
    AnnounceSnapshot(sync::AnnounceSnapshot),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::RequestEquip(_) => Opcode::RequestEquip,
            Self::RequestUnequip(_) => Opcode::RequestUnequip,
            Self::ConfirmRelease(_) => Opcode::ConfirmRelease,
            Self::RequestResync(_) => Opcode::RequestResync,
            Self::AnnounceEquip(_) => Opcode::AnnounceEquip,
            Self::AnnounceUnequip(_) => Opcode::AnnounceUnequip,
            Self::AnnounceRejected(_) => Opcode::AnnounceRejected,
            Self::AnnounceSnapshot(_) => Opcode::AnnounceSnapshot,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Size limits are enforced later by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::RequestEquip(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RequestUnequip(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ConfirmRelease(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RequestResync(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AnnounceEquip(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AnnounceUnequip(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AnnounceRejected(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::AnnounceSnapshot(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload bytes for the given opcode.
    ///
    /// The size check runs before CBOR parsing.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed `MAX_PAYLOAD_SIZE`
    /// - `ProtocolError::CborDecode` if deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::RequestEquip => Self::RequestEquip(from_cbor(bytes)?),
            Opcode::RequestUnequip => Self::RequestUnequip(from_cbor(bytes)?),
            Opcode::ConfirmRelease => Self::ConfirmRelease(from_cbor(bytes)?),
            Opcode::RequestResync => Self::RequestResync(from_cbor(bytes)?),
            Opcode::AnnounceEquip => Self::AnnounceEquip(from_cbor(bytes)?),
            Opcode::AnnounceUnequip => Self::AnnounceUnequip(from_cbor(bytes)?),
            Opcode::AnnounceRejected => Self::AnnounceRejected(from_cbor(bytes)?),
            Opcode::AnnounceSnapshot => Self::AnnounceSnapshot(from_cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Encode into a frame sent by `sender`.
    ///
    /// Snapshots larger than one frame must be split with
    /// [`sync::AnnounceSnapshot::into_parts`] first.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    /// - `ProtocolError::PayloadTooLarge` if the encoding exceeds
    ///   `MAX_PAYLOAD_SIZE`
    pub fn into_frame(self, sender: ParticipantId) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;

        if buf.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: buf.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(Frame::new(FrameHeader::new(self.opcode(), sender), buf))
    }

    /// Parse the payload carried by a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is not recognized
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

/// Serialize any payload struct to CBOR bytes.
///
/// Used by fuzzers and tests to build payload bytes without a frame.
///
/// # Errors
///
/// - `ProtocolError::CborEncode` if serialization fails
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}
