//! Per-participant lock flags.
//!
//! Only the equip-change flag is enforced here (by the controller). Pickup and
//! item-use are published for collaborators; setting any flag never cancels a
//! round that is already in flight.

use std::fmt;

use crate::error::LockError;

/// One of the three independent lock flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lock {
    /// Gates equip, unequip, unequip-all and unequip-from
    EquipChange,
    /// Advisory: picking items up
    Pickup,
    /// Advisory: using equipped items
    ItemUse,
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EquipChange => write!(f, "equip change"),
            Self::Pickup => write!(f, "pickup"),
            Self::ItemUse => write!(f, "item use"),
        }
    }
}

/// Three independent boolean gates. All open by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockGate {
    equip_change: bool,
    pickup: bool,
    item_use: bool,
}

impl LockGate {
    /// Set or clear a flag.
    pub fn set(&mut self, lock: Lock, locked: bool) {
        match lock {
            Lock::EquipChange => self.equip_change = locked,
            Lock::Pickup => self.pickup = locked,
            Lock::ItemUse => self.item_use = locked,
        }
    }

    /// Whether a flag is set.
    pub fn is_locked(&self, lock: Lock) -> bool {
        match lock {
            Lock::EquipChange => self.equip_change,
            Lock::Pickup => self.pickup,
            Lock::ItemUse => self.item_use,
        }
    }

    /// Fail with [`LockError::Locked`] if the flag is set.
    pub fn ensure_unlocked(&self, lock: Lock) -> Result<(), LockError> {
        if self.is_locked(lock) { Err(LockError::Locked(lock)) } else { Ok(()) }
    }

    /// Whether equip and unequip requests are currently allowed.
    pub fn can_change_equipment(&self) -> bool {
        !self.equip_change
    }

    /// Whether the participant may pick items up.
    pub fn can_pick_up(&self) -> bool {
        !self.pickup
    }

    /// Whether the participant may use equipped items.
    pub fn can_use_items(&self) -> bool {
        !self.item_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent() {
        let mut gate = LockGate::default();
        gate.set(Lock::Pickup, true);

        assert!(!gate.can_pick_up());
        assert!(gate.can_use_items());
        assert!(gate.can_change_equipment());
        assert_eq!(gate.ensure_unlocked(Lock::EquipChange), Ok(()));
        assert_eq!(gate.ensure_unlocked(Lock::Pickup), Err(LockError::Locked(Lock::Pickup)));

        gate.set(Lock::Pickup, false);
        assert_eq!(gate, LockGate::default());
    }
}
