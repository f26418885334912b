//! Error types for the handoff core.
//!
//! Every failure in the protocol is local-recoverable: the operation that hit
//! it is aborted and logged, the session continues. [`ErrorCategory`] is the
//! coarse taxonomy callers branch on; the per-layer enums carry the detail.

use handoff_proto::ItemRef;
use thiserror::Error;

use crate::{lock::Lock, slot::DeviceId};

/// Coarse classification shared by every handoff error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Non-existent or mismatched slot
    InvalidSlot,
    /// Device registered twice, or an item bound where it may not be
    DuplicateBinding,
    /// An announcement names an item this machine cannot resolve
    MissingCollaborator,
    /// A lock flag refused the operation
    Locked,
    /// The participant is not controlled by this machine
    NotLocal,
    /// The directed call to the server failed
    Transport,
    /// A frame could not be decoded or violated the protocol
    Protocol,
}

/// Slot registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    /// `add_slot` called for a device that already has a slot
    #[error("device {0} already has a slot")]
    DuplicateDevice(DeviceId),

    /// No slot is registered for the device
    #[error("no slot registered for device {0}")]
    UnknownDevice(DeviceId),

    /// The item is already bound in another slot of the same participant
    #[error("{item} is already bound to device {device}")]
    ItemAlreadyBound {
        /// Item that was being bound
        item: ItemRef,
        /// Device whose slot already holds it
        device: DeviceId,
    },
}

impl SlotError {
    /// Taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownDevice(_) => ErrorCategory::InvalidSlot,
            Self::DuplicateDevice(_) | Self::ItemAlreadyBound { .. } => {
                ErrorCategory::DuplicateBinding
            },
        }
    }
}

/// Lock gate refusals.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The flag guarding the operation is set
    #[error("{0} is locked")]
    Locked(Lock),
}

/// Failure reported by a transport link.
///
/// The link owns the transport, so the detail is an opaque description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct LinkError(pub String);
