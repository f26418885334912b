//! Simulated items and participant hooks.
//!
//! Both record every callback so tests can assert on hook ordering per
//! machine.

use std::collections::{BTreeMap, BTreeSet};

use handoff_core::{DeviceId, Item, ItemDirectory, ParticipantHooks};
use handoff_proto::{ItemRef, ParticipantId};

/// A callback received by a [`SimItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCall {
    /// `on_equip(holder, device)`
    Equip {
        /// New holder
        holder: ParticipantId,
        /// Device it is bound to
        device: DeviceId,
    },
    /// `on_unequip()`
    Unequip,
    /// `take_local_control()`
    TakeControl,
    /// `release_authority()`
    Release,
}

/// Item that records its callbacks and whether this machine drives it.
#[derive(Debug, Clone, Default)]
pub struct SimItem {
    calls: Vec<ItemCall>,
    driven: bool,
}

impl SimItem {
    /// Every callback in arrival order.
    pub fn calls(&self) -> &[ItemCall] {
        &self.calls
    }

    /// Whether this machine currently drives the item.
    pub fn is_driven(&self) -> bool {
        self.driven
    }
}

impl Item for SimItem {
    fn on_equip(&mut self, holder: ParticipantId, device: DeviceId) {
        self.calls.push(ItemCall::Equip { holder, device });
    }

    fn on_unequip(&mut self) {
        self.calls.push(ItemCall::Unequip);
    }

    fn take_local_control(&mut self) {
        self.calls.push(ItemCall::TakeControl);
        self.driven = true;
    }

    fn release_authority(&mut self) {
        self.calls.push(ItemCall::Release);
        self.driven = false;
    }
}

/// One machine's view of the shared items.
///
/// Items can be hidden to simulate objects that have not been replicated to
/// this machine yet.
#[derive(Debug, Clone, Default)]
pub struct SimItemDirectory {
    items: BTreeMap<ItemRef, SimItem>,
    hidden: BTreeSet<ItemRef>,
}

impl SimItemDirectory {
    /// Directory holding a fresh [`SimItem`] for each reference.
    pub fn with_items(items: impl IntoIterator<Item = ItemRef>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item, SimItem::default())).collect(),
            hidden: BTreeSet::new(),
        }
    }

    /// Recorded state of `item`, hidden or not.
    pub fn get(&self, item: ItemRef) -> Option<&SimItem> {
        self.items.get(&item)
    }

    /// Make `item` unresolvable.
    pub fn hide(&mut self, item: ItemRef) {
        self.hidden.insert(item);
    }

    /// Make `item` resolvable again.
    pub fn reveal(&mut self, item: ItemRef) {
        self.hidden.remove(&item);
    }

    /// Items this machine currently drives.
    pub fn driven(&self) -> BTreeSet<ItemRef> {
        self.items.iter().filter(|(_, item)| item.is_driven()).map(|(item, _)| *item).collect()
    }
}

impl ItemDirectory for SimItemDirectory {
    fn resolve(&mut self, item: ItemRef) -> Option<&mut dyn Item> {
        if self.hidden.contains(&item) {
            return None;
        }
        self.items.get_mut(&item).map(|item| item as &mut dyn Item)
    }
}

/// A participant-side callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// `on_equip(device, item)`; `device` is `None` off the holder's machine
    Equipped {
        /// Slot device on the holder's machine
        device: Option<DeviceId>,
        /// Item
        item: ItemRef,
    },
    /// `on_unequip(item)`
    Unequipped {
        /// Item
        item: ItemRef,
    },
}

/// Participant hooks that record every callback.
#[derive(Debug, Clone, Default)]
pub struct RecordingHooks {
    events: Vec<HookEvent>,
    main: Option<DeviceId>,
}

impl RecordingHooks {
    /// Hooks whose main device is `device`.
    pub fn with_main(device: DeviceId) -> Self {
        Self { events: Vec::new(), main: Some(device) }
    }

    /// Recorded callbacks in arrival order.
    pub fn events(&self) -> &[HookEvent] {
        &self.events
    }
}

impl ParticipantHooks for RecordingHooks {
    fn on_equip(&mut self, device: Option<DeviceId>, item: ItemRef) {
        self.events.push(HookEvent::Equipped { device, item });
    }

    fn on_unequip(&mut self, item: ItemRef) {
        self.events.push(HookEvent::Unequipped { item });
    }

    fn main_device(&self) -> Option<DeviceId> {
        self.main
    }
}
