//! Model world - the sequential reference.
//!
//! The model applies each operation as if its whole round completed before
//! the next one starts, under the last-write-wins policy. It is the oracle the
//! simulated cluster is compared against when delivery is reliable and the
//! cluster is run to quiescence after every operation.

use std::collections::BTreeMap;

use handoff_proto::{ItemRef, ParticipantId};

use super::operation::{Operation, OperationError, OperationResult, WorldShape};

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Per-participant slot contents, in slot order.
    pub slots: Vec<Vec<Option<ItemRef>>>,
    /// Holder of every item, in item order.
    pub holders: Vec<(ItemRef, Option<ParticipantId>)>,
}

/// Model world - the reference implementation.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    shape: WorldShape,
    /// Slot contents per participant index.
    slots: Vec<Vec<Option<ItemRef>>>,
    /// Equip-change lock per participant index.
    locked: Vec<bool>,
    /// Item holder by participant index.
    holders: BTreeMap<ItemRef, usize>,
}

impl ModelWorld {
    /// Create an empty world of the given shape.
    pub fn new(shape: WorldShape) -> Self {
        Self {
            shape,
            slots: vec![vec![None; shape.devices]; shape.participants],
            locked: vec![false; shape.participants],
            holders: BTreeMap::new(),
        }
    }

    /// Shape of the world.
    pub fn shape(&self) -> WorldShape {
        self.shape
    }

    /// Apply an operation and return the result.
    ///
    /// This is the main entry point for model-based testing. The result should
    /// match the real implementation's result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match *op {
            Operation::Equip { participant, device, item, replace } => self.apply_equip(
                self.shape.participant_index(participant),
                self.shape.device_index(device),
                self.shape.item(item),
                replace,
            ),
            Operation::EquipMain { participant, item, replace } => self.apply_equip(
                self.shape.participant_index(participant),
                0,
                self.shape.item(item),
                replace,
            ),
            Operation::Unequip { participant, item } => {
                self.apply_unequip(self.shape.participant_index(participant), self.shape.item(item))
            },
            Operation::UnequipAll { participant } => {
                self.apply_unequip_all(self.shape.participant_index(participant))
            },
            Operation::UnequipFrom { participant, device } => self.apply_unequip_from(
                self.shape.participant_index(participant),
                self.shape.device_index(device),
            ),
            Operation::SetLock { participant, locked } => {
                self.locked[self.shape.participant_index(participant)] = locked;
                OperationResult::Ok
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let holders = self
            .shape
            .all_items()
            .map(|item| (item, self.holders.get(&item).map(|p| WorldShape::participant_id(*p))))
            .collect();

        ObservableState { slots: self.slots.clone(), holders }
    }

    fn apply_equip(
        &mut self,
        participant: usize,
        device: usize,
        item: ItemRef,
        replace: bool,
    ) -> OperationResult {
        if self.locked[participant] {
            return OperationResult::Error(OperationError::Locked);
        }

        let current = self.slots[participant][device];
        if current == Some(item) {
            return OperationResult::Error(OperationError::AlreadyEquipped);
        }
        if self.slots[participant].contains(&Some(item)) {
            return OperationResult::Error(OperationError::ItemAlreadyBound);
        }

        if let Some(current) = current {
            if !replace {
                return OperationResult::Error(OperationError::SlotOccupied);
            }
            self.release(participant, current);
        }

        // Last write wins: the previous holder loses the item.
        if let Some(previous) = self.holders.insert(item, participant) {
            for slot in &mut self.slots[previous] {
                if *slot == Some(item) {
                    *slot = None;
                }
            }
        }
        self.slots[participant][device] = Some(item);

        OperationResult::Ok
    }

    fn apply_unequip(&mut self, participant: usize, item: ItemRef) -> OperationResult {
        if self.locked[participant] {
            return OperationResult::Error(OperationError::Locked);
        }
        if !self.slots[participant].contains(&Some(item)) {
            return OperationResult::Error(OperationError::NotEquipped);
        }

        self.release(participant, item);
        OperationResult::Ok
    }

    fn apply_unequip_all(&mut self, participant: usize) -> OperationResult {
        if self.locked[participant] {
            return OperationResult::Error(OperationError::Locked);
        }

        let bound: Vec<ItemRef> = self.slots[participant].iter().flatten().copied().collect();
        for item in bound {
            self.release(participant, item);
        }
        OperationResult::Ok
    }

    fn apply_unequip_from(&mut self, participant: usize, device: usize) -> OperationResult {
        if self.locked[participant] {
            return OperationResult::Error(OperationError::Locked);
        }

        if let Some(item) = self.slots[participant][device] {
            self.release(participant, item);
        }
        OperationResult::Ok
    }

    fn release(&mut self, participant: usize, item: ItemRef) {
        for slot in &mut self.slots[participant] {
            if *slot == Some(item) {
                *slot = None;
            }
        }
        if self.holders.get(&item) == Some(&participant) {
            self.holders.remove(&item);
        }
    }
}
