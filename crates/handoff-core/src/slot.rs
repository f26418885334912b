//! Input slots: one device, at most one bound item.
//!
//! A participant's slots are kept in registration order. Lookups are linear
//! scans returning the first match, which is fine for the handful of devices a
//! participant owns.
//!
//! # Invariants
//!
//! - A device appears in exactly one slot.
//! - An item is bound in at most one slot.

use std::fmt;

use handoff_proto::ItemRef;

use crate::error::SlotError;

/// Opaque local identity of an input device. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// A device and the item (if any) it currently drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSlot {
    device: DeviceId,
    item: Option<ItemRef>,
}

impl InputSlot {
    /// Device owning this slot.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Item bound to this slot.
    pub fn item(&self) -> Option<ItemRef> {
        self.item
    }

    /// Whether an item is bound.
    pub fn is_occupied(&self) -> bool {
        self.item.is_some()
    }
}

/// Ordered collection of a participant's input slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRegistry {
    slots: Vec<InputSlot>,
}

impl SlotRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new slot for `device`, returning its index.
    ///
    /// # Errors
    ///
    /// - `SlotError::DuplicateDevice` if the device already has a slot
    pub fn add_slot(&mut self, device: DeviceId) -> Result<usize, SlotError> {
        if self.is_device_bound(device) {
            return Err(SlotError::DuplicateDevice(device));
        }

        self.slots.push(InputSlot { device, item: None });
        Ok(self.slots.len() - 1)
    }

    /// Slot at `index`, or `None` if out of range.
    pub fn slot_at(&self, index: usize) -> Option<&InputSlot> {
        self.slots.get(index)
    }

    /// First slot bound to `item`.
    pub fn find_by_item(&self, item: ItemRef) -> Option<&InputSlot> {
        self.slots.iter().find(|slot| slot.item == Some(item))
    }

    /// Slot registered for `device`.
    pub fn find_by_device(&self, device: DeviceId) -> Option<&InputSlot> {
        self.slots.iter().find(|slot| slot.device == device)
    }

    /// Whether any slot is bound to `item`.
    pub fn is_item_bound(&self, item: ItemRef) -> bool {
        self.find_by_item(item).is_some()
    }

    /// Whether `device` has a registered slot.
    pub fn is_device_bound(&self, device: DeviceId) -> bool {
        self.find_by_device(device).is_some()
    }

    /// Bound items in slot order.
    pub fn bound_items(&self) -> impl Iterator<Item = ItemRef> + '_ {
        self.slots.iter().filter_map(InputSlot::item)
    }

    /// All slots in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &InputSlot> {
        self.slots.iter()
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Primary device: `preferred` if it has a slot, otherwise the first slot.
    pub fn main_device(&self, preferred: Option<DeviceId>) -> Option<DeviceId> {
        preferred
            .filter(|device| self.is_device_bound(*device))
            .or_else(|| self.slots.first().map(InputSlot::device))
    }

    /// Bind `item` to the slot of `device`, returning the item it replaced.
    ///
    /// Binding the item the slot already holds is a no-op returning it.
    ///
    /// # Errors
    ///
    /// - `SlotError::UnknownDevice` if the device has no slot
    /// - `SlotError::ItemAlreadyBound` if another slot holds the item
    pub fn bind(&mut self, device: DeviceId, item: ItemRef) -> Result<Option<ItemRef>, SlotError> {
        if let Some(other) = self.find_by_item(item)
            && other.device != device
        {
            return Err(SlotError::ItemAlreadyBound { item, device: other.device });
        }

        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.device == device)
            .ok_or(SlotError::UnknownDevice(device))?;

        Ok(slot.item.replace(item))
    }

    /// Clear the slot holding `item`, returning its device.
    pub fn unbind(&mut self, item: ItemRef) -> Option<DeviceId> {
        let slot = self.slots.iter_mut().find(|slot| slot.item == Some(item))?;
        slot.item = None;
        Some(slot.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(devices: &[u32]) -> SlotRegistry {
        let mut slots = SlotRegistry::new();
        for device in devices {
            slots.add_slot(DeviceId(*device)).unwrap();
        }
        slots
    }

    #[test]
    fn duplicate_device_rejected() {
        let mut slots = registry(&[1]);
        assert_eq!(slots.add_slot(DeviceId(1)), Err(SlotError::DuplicateDevice(DeviceId(1))));
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn slot_at_out_of_range() {
        let slots = registry(&[1, 2]);
        assert_eq!(slots.slot_at(1).map(InputSlot::device), Some(DeviceId(2)));
        assert!(slots.slot_at(2).is_none());
    }

    #[test]
    fn bind_replaces_and_unbind_clears() {
        let mut slots = registry(&[1, 2]);

        assert_eq!(slots.bind(DeviceId(1), ItemRef(10)), Ok(None));
        assert_eq!(slots.bind(DeviceId(1), ItemRef(11)), Ok(Some(ItemRef(10))));
        assert!(!slots.is_item_bound(ItemRef(10)));

        assert_eq!(slots.unbind(ItemRef(11)), Some(DeviceId(1)));
        assert_eq!(slots.unbind(ItemRef(11)), None);
        assert_eq!(slots.bound_items().count(), 0);
    }

    #[test]
    fn item_cannot_occupy_two_slots() {
        let mut slots = registry(&[1, 2]);
        slots.bind(DeviceId(1), ItemRef(10)).unwrap();

        assert_eq!(
            slots.bind(DeviceId(2), ItemRef(10)),
            Err(SlotError::ItemAlreadyBound { item: ItemRef(10), device: DeviceId(1) })
        );
        assert_eq!(slots.bind(DeviceId(9), ItemRef(11)), Err(SlotError::UnknownDevice(DeviceId(9))));
    }

    #[test]
    fn main_device_prefers_registered_hint() {
        let slots = registry(&[3, 4]);
        assert_eq!(slots.main_device(None), Some(DeviceId(3)));
        assert_eq!(slots.main_device(Some(DeviceId(4))), Some(DeviceId(4)));
        assert_eq!(slots.main_device(Some(DeviceId(7))), Some(DeviceId(3)));
        assert_eq!(SlotRegistry::new().main_device(Some(DeviceId(7))), None);
    }
}
