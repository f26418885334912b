//! Observable cluster state for invariant checking.

use std::collections::{BTreeMap, BTreeSet};

use handoff_core::{DeviceId, LedgerEntry};
use handoff_proto::{ItemRef, ParticipantId};

/// One machine as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSnapshot {
    /// Locally controlled participant
    pub participant: ParticipantId,
    /// The machine's mirror of the server ledger
    pub mirror: BTreeMap<ItemRef, LedgerEntry>,
    /// Local participant's slots in order
    pub slots: Vec<(DeviceId, Option<ItemRef>)>,
    /// Items the finalizer has under local control
    pub controlled: BTreeSet<ItemRef>,
    /// Items whose local object reports being driven by this machine
    pub driven: BTreeSet<ItemRef>,
    /// Requests still waiting for an answer
    pub pending: usize,
    /// Items the machine could not resolve and awaits a resync for
    pub unresolved: BTreeSet<ItemRef>,
}

impl MachineSnapshot {
    /// Items bound in any slot.
    pub fn bound(&self) -> BTreeSet<ItemRef> {
        self.slots.iter().filter_map(|(_, item)| *item).collect()
    }

    /// Mirror entry for `item`, defaulting to unowned at revision zero.
    pub fn mirror_entry(&self, item: ItemRef) -> LedgerEntry {
        self.mirror.get(&item).copied().unwrap_or_default()
    }
}

/// Whole-cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemSnapshot {
    /// Nothing in flight: every sent frame was delivered or lost
    pub quiescent: bool,
    /// The server's authoritative ledger
    pub ledger: BTreeMap<ItemRef, LedgerEntry>,
    /// Connected machines
    pub machines: Vec<MachineSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot with no machines and no items.
    pub fn empty() -> Self {
        Self { quiescent: true, ..Self::default() }
    }

    /// Items the server ledger says `participant` holds.
    pub fn held_by(&self, participant: ParticipantId) -> BTreeSet<ItemRef> {
        self.ledger
            .iter()
            .filter(|(_, entry)| entry.state.is_owned_by(participant))
            .map(|(item, _)| *item)
            .collect()
    }
}
