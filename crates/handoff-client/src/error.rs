//! Controller errors.

use handoff_core::{DeviceId, ErrorCategory, LinkError, LockError, SlotError};
use handoff_proto::{ItemRef, Opcode, ParticipantId, ProtocolError};
use thiserror::Error;

/// Errors returned by [`crate::Controller`].
///
/// A local rejection never changes state and never produces traffic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// No replica of this participant exists on this machine
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// The participant is controlled by another machine
    #[error("participant {0} is not controlled by this machine")]
    NotLocal(ParticipantId),

    /// No locally controlled participant can send on this machine's behalf
    #[error("no local participant")]
    NoLocalParticipant,

    /// A lock flag refused the operation
    #[error(transparent)]
    Locked(#[from] LockError),

    /// Slot registry refused the operation
    #[error(transparent)]
    Slot(#[from] SlotError),

    /// The slot already holds this very item
    #[error("{item} is already equipped on {device}")]
    AlreadyEquipped {
        /// Item being equipped
        item: ItemRef,
        /// Device whose slot holds it
        device: DeviceId,
    },

    /// The slot holds another item and replacing was not allowed
    #[error("slot {device} already holds {current}")]
    SlotOccupied {
        /// Target device
        device: DeviceId,
        /// Item currently bound there
        current: ItemRef,
    },

    /// Unequip of an item none of the participant's slots holds
    #[error("{0} is not equipped")]
    NotEquipped(ItemRef),

    /// The participant has no slot to use as main device
    #[error("participant {0} has no main device")]
    NoMainDevice(ParticipantId),

    /// An announcement names an item this machine cannot resolve
    #[error("cannot resolve {0}")]
    MissingItem(ItemRef),

    /// The directed call to the server failed; the optimistic change was undone
    #[error(transparent)]
    Transport(#[from] LinkError),

    /// Frame could not be decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A frame a client never expects (request opcode or non-server sender)
    #[error("unexpected {opcode:?} frame from {sender}")]
    UnexpectedFrame {
        /// Opcode of the frame
        opcode: Opcode,
        /// Sender in the frame header
        sender: ParticipantId,
    },
}

impl ControllerError {
    /// Taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownParticipant(_) | Self::NotLocal(_) | Self::NoLocalParticipant => {
                ErrorCategory::NotLocal
            },
            Self::Locked(_) => ErrorCategory::Locked,
            Self::Slot(err) => err.category(),
            Self::AlreadyEquipped { .. } | Self::SlotOccupied { .. } => {
                ErrorCategory::DuplicateBinding
            },
            Self::NotEquipped(_) | Self::NoMainDevice(_) => ErrorCategory::InvalidSlot,
            Self::MissingItem(_) => ErrorCategory::MissingCollaborator,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Protocol(_) | Self::UnexpectedFrame { .. } => ErrorCategory::Protocol,
        }
    }
}
