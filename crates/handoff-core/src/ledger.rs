//! Item authority ledger.
//!
//! The server owns the authoritative ledger and bumps an item's revision on
//! every change. Each machine keeps a mirror that only moves forward: an
//! announcement whose revision is not newer than the mirror's is ignored, so
//! redelivered broadcasts are harmless.
//!
//! Both sides report changes as [`Transition`]s (previous state, new state),
//! which is what the controller turns into release and grant paths.

use std::collections::BTreeMap;

use handoff_proto::{ItemRef, ParticipantId, payloads::sync::LedgerRecord};

/// Who holds exclusive write-authority over an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AuthorityState {
    /// Nobody; the server drives the item
    #[default]
    Unowned,
    /// The participant holds authority
    Owned(ParticipantId),
}

impl AuthorityState {
    /// Build from an optional holder.
    pub fn from_holder(holder: Option<ParticipantId>) -> Self {
        holder.map_or(Self::Unowned, Self::Owned)
    }

    /// Current holder, if any.
    pub fn holder(self) -> Option<ParticipantId> {
        match self {
            Self::Unowned => None,
            Self::Owned(holder) => Some(holder),
        }
    }

    /// Whether `participant` holds the item.
    pub fn is_owned_by(self, participant: ParticipantId) -> bool {
        self == Self::Owned(participant)
    }
}

/// Ledger state of one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Current authority
    pub state: AuthorityState,
    /// Number of changes applied to this item
    pub revision: u64,
}

/// A ledger change for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Item that changed
    pub item: ItemRef,
    /// State before the change
    pub previous: AuthorityState,
    /// State after the change
    pub current: AuthorityState,
    /// Revision of the new state
    pub revision: u64,
}

impl Transition {
    /// Holder that lost the item, if the holder changed.
    pub fn released(&self) -> Option<ParticipantId> {
        self.previous.holder().filter(|_| self.previous != self.current)
    }

    /// Holder that gained the item, if the holder changed.
    pub fn granted(&self) -> Option<ParticipantId> {
        self.current.holder().filter(|_| self.previous != self.current)
    }
}

/// Per-item authority with revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityLedger {
    entries: BTreeMap<ItemRef, LedgerEntry>,
}

impl AuthorityLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `item` as unowned at revision 0. Returns false if already known.
    pub fn register(&mut self, item: ItemRef) -> bool {
        if self.entries.contains_key(&item) {
            return false;
        }
        self.entries.insert(item, LedgerEntry::default());
        true
    }

    /// Whether `item` has an entry.
    pub fn contains(&self, item: ItemRef) -> bool {
        self.entries.contains_key(&item)
    }

    /// Entry for `item`, if known.
    pub fn entry(&self, item: ItemRef) -> Option<LedgerEntry> {
        self.entries.get(&item).copied()
    }

    /// Authority over `item`; unknown items are unowned.
    pub fn state(&self, item: ItemRef) -> AuthorityState {
        self.entry(item).map(|entry| entry.state).unwrap_or_default()
    }

    /// Holder of `item`, if any.
    pub fn holder(&self, item: ItemRef) -> Option<ParticipantId> {
        self.state(item).holder()
    }

    /// Revision of `item`; unknown items are at revision 0.
    pub fn revision(&self, item: ItemRef) -> u64 {
        self.entry(item).map_or(0, |entry| entry.revision)
    }

    /// Items held by `participant`, in item order.
    pub fn items_held_by(&self, participant: ParticipantId) -> impl Iterator<Item = ItemRef> + '_ {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.state.is_owned_by(participant))
            .map(|(item, _)| *item)
    }

    /// All entries in item order.
    pub fn iter(&self) -> impl Iterator<Item = (ItemRef, LedgerEntry)> + '_ {
        self.entries.iter().map(|(item, entry)| (*item, *entry))
    }

    /// Number of known items.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no item is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Authoritative update: set the state and bump the revision.
    ///
    /// Always bumps, even when the state is unchanged, so a re-grant is
    /// observable as a new revision.
    pub fn set(&mut self, item: ItemRef, state: AuthorityState) -> Transition {
        let entry = self.entries.entry(item).or_default();
        let previous = entry.state;

        entry.state = state;
        entry.revision += 1;

        Transition { item, previous, current: state, revision: entry.revision }
    }

    /// Mirror update: apply only if `revision` is newer than what is held.
    ///
    /// Returns `None` for stale or duplicate announcements.
    pub fn apply(
        &mut self,
        item: ItemRef,
        state: AuthorityState,
        revision: u64,
    ) -> Option<Transition> {
        if revision <= self.revision(item) {
            return None;
        }

        let entry = self.entries.entry(item).or_default();
        let previous = entry.state;
        *entry = LedgerEntry { state, revision };

        Some(Transition { item, previous, current: state, revision })
    }

    /// Export as wire records.
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.iter()
            .map(|(item, entry)| LedgerRecord {
                item,
                holder: entry.state.holder(),
                revision: entry.revision,
            })
            .collect()
    }
}
