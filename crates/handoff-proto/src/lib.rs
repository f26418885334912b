//! Wire contract for the item authority handoff protocol.
//!
//! Every message travels as a [`Frame`]: a fixed 16-byte binary header
//! followed by a CBOR payload. The header carries the opcode and the sender so
//! the server can route and attribute a frame before touching the payload.
//!
//! # Messages
//!
//! Participants send directed requests to the server ([`Payload::RequestEquip`],
//! [`Payload::RequestUnequip`], [`Payload::ConfirmRelease`],
//! [`Payload::RequestResync`]). The server answers every state change with a
//! broadcast to all machines ([`Payload::AnnounceEquip`],
//! [`Payload::AnnounceUnequip`], [`Payload::AnnounceRejected`],
//! [`Payload::AnnounceSnapshot`]).

#![deny(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod ids;
mod opcode;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use ids::{ItemRef, ParticipantId};
pub use opcode::Opcode;
pub use payloads::Payload;
