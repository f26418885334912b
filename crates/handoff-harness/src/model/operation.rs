//! Operations for model-based testing.
//!
//! Operations represent every local intent a participant can express. They are
//! generated randomly and applied to both the model and the simulated cluster.
//! Indices are raw bytes and are reduced to the world's [`WorldShape`] on use,
//! so any generated value is meaningful.

use arbitrary::Arbitrary;
use handoff_client::{ControllerError, ErrorCategory};
use handoff_core::{DeviceId, SlotError};
use handoff_proto::{ItemRef, ParticipantId};

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Equip an item on one of the participant's devices.
    Equip {
        /// Participant index.
        participant: u8,
        /// Device index within the participant.
        device: u8,
        /// Item index.
        item: u8,
        /// Replace whatever the slot holds.
        replace: bool,
    },

    /// Equip an item on the participant's main device.
    EquipMain {
        /// Participant index.
        participant: u8,
        /// Item index.
        item: u8,
        /// Replace whatever the slot holds.
        replace: bool,
    },

    /// Unequip an item from whichever slot holds it.
    Unequip {
        /// Participant index.
        participant: u8,
        /// Item index.
        item: u8,
    },

    /// Unequip everything the participant has bound.
    UnequipAll {
        /// Participant index.
        participant: u8,
    },

    /// Unequip whatever a device's slot holds.
    UnequipFrom {
        /// Participant index.
        participant: u8,
        /// Device index within the participant.
        device: u8,
    },

    /// Set or clear the equip-change lock.
    SetLock {
        /// Participant index.
        participant: u8,
        /// New lock state.
        locked: bool,
    },
}

/// Sizes of a simulated world and the mapping from indices to identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldShape {
    /// Number of participants, one per machine.
    pub participants: usize,
    /// Devices (slots) per participant.
    pub devices: usize,
    /// Number of shared items.
    pub items: usize,
}

impl WorldShape {
    /// Participant index for a raw operand.
    pub fn participant_index(&self, raw: u8) -> usize {
        usize::from(raw) % self.participants.max(1)
    }

    /// Device index for a raw operand.
    pub fn device_index(&self, raw: u8) -> usize {
        usize::from(raw) % self.devices.max(1)
    }

    /// Item for a raw operand.
    pub fn item(&self, raw: u8) -> ItemRef {
        Self::item_at(usize::from(raw) % self.items.max(1))
    }

    /// Identity of the participant at `index`.
    pub fn participant_id(index: usize) -> ParticipantId {
        ParticipantId(index as u64 + 1)
    }

    /// Identity of the `device`-th device of the participant at `index`.
    pub fn device_id(index: usize, device: usize) -> DeviceId {
        DeviceId(((index + 1) * 100 + device) as u32)
    }

    /// Identity of the item at `index`.
    pub fn item_at(index: usize) -> ItemRef {
        ItemRef(index as u64 + 1)
    }

    /// Every item in the world.
    pub fn all_items(&self) -> impl Iterator<Item = ItemRef> {
        (0..self.items).map(Self::item_at)
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation was accepted locally.
    Ok,

    /// Operation was rejected locally.
    Error(OperationError),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, OperationResult::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

/// Local rejections the model predicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Equip changes are locked.
    Locked,
    /// The slot already holds this item.
    AlreadyEquipped,
    /// Another slot of the participant holds this item.
    ItemAlreadyBound,
    /// The slot is occupied and replacing was not allowed.
    SlotOccupied,
    /// No slot of the participant holds the item.
    NotEquipped,
    /// Anything the model does not predict, by category.
    Other(ErrorCategory),
}

impl From<&ControllerError> for OperationError {
    fn from(err: &ControllerError) -> Self {
        match err {
            ControllerError::Locked(_) => Self::Locked,
            ControllerError::AlreadyEquipped { .. } => Self::AlreadyEquipped,
            ControllerError::Slot(SlotError::ItemAlreadyBound { .. }) => Self::ItemAlreadyBound,
            ControllerError::SlotOccupied { .. } => Self::SlotOccupied,
            ControllerError::NotEquipped(_) => Self::NotEquipped,
            other => Self::Other(other.category()),
        }
    }
}

impl<T> From<Result<T, ControllerError>> for OperationResult {
    fn from(result: Result<T, ControllerError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => Self::Error(OperationError::from(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use handoff_client::Lock;
    use handoff_core::LockError;

    use super::*;

    #[test]
    fn indices_wrap_into_the_world() {
        let shape = WorldShape { participants: 3, devices: 2, items: 4 };

        assert_eq!(shape.participant_index(7), 1);
        assert_eq!(shape.device_index(5), 1);
        assert_eq!(shape.item(9), ItemRef(2));
        assert_eq!(WorldShape::device_id(1, 1), DeviceId(201));
        assert_eq!(shape.all_items().count(), 4);
    }

    #[test]
    fn controller_errors_map_to_model_errors() {
        let locked: OperationResult =
            Err::<(), _>(ControllerError::Locked(LockError::Locked(Lock::EquipChange))).into();
        assert_eq!(locked, OperationResult::Error(OperationError::Locked));

        let unpredicted: OperationResult =
            Err::<(), _>(ControllerError::NoMainDevice(ParticipantId(1))).into();
        assert_eq!(
            unpredicted,
            OperationResult::Error(OperationError::Other(ErrorCategory::InvalidSlot))
        );
    }
}
