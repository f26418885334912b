//! Participant replicas.
//!
//! Every machine holds one replica per participant in the session. Exactly one
//! machine controls each participant; only that machine's replica has slots,
//! pending requests and a [`LocalAuthorityFinalizer`].

use std::collections::BTreeMap;

use handoff_core::{
    AuthorityLedger, DeviceId, LockGate, ParticipantHooks, SessionRegistry, SlotError,
    SlotRegistry,
};
use handoff_proto::{ItemRef, ParticipantId};

use crate::finalizer::LocalAuthorityFinalizer;

/// What an in-flight request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Grant the item, bound to this device
    Equip {
        /// Device the item was bound to when the request was sent
        device: DeviceId,
    },
    /// Release the item
    Unequip,
}

/// Latest unresolved request for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request id carried on the wire
    pub request_id: u64,
    /// What was asked
    pub intent: Intent,
}

/// Per-item phase as observed by one participant replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    /// Not held and nothing requested
    Unequipped,
    /// Equip requested, not yet resolved
    PendingGrant,
    /// Held according to the mirror
    Equipped,
    /// Unequip requested, not yet resolved
    PendingRelease,
}

/// One machine's copy of a participant.
pub struct Participant<H> {
    id: ParticipantId,
    hooks: H,
    slots: SlotRegistry,
    locks: LockGate,
    pending: BTreeMap<ItemRef, PendingRequest>,
    last_request_id: u64,
    finalizer: Option<LocalAuthorityFinalizer>,
    registered: bool,
}

impl<H: ParticipantHooks> Participant<H> {
    /// Replica of a participant controlled by this machine.
    pub fn local(id: ParticipantId, hooks: H) -> Self {
        Self::with_finalizer(id, hooks, Some(LocalAuthorityFinalizer::new()))
    }

    /// Replica of a participant controlled elsewhere.
    pub fn remote(id: ParticipantId, hooks: H) -> Self {
        Self::with_finalizer(id, hooks, None)
    }

    fn with_finalizer(
        id: ParticipantId,
        hooks: H,
        finalizer: Option<LocalAuthorityFinalizer>,
    ) -> Self {
        Self {
            id,
            hooks,
            slots: SlotRegistry::new(),
            locks: LockGate::default(),
            pending: BTreeMap::new(),
            last_request_id: 0,
            finalizer,
            registered: false,
        }
    }

    /// Register with the session and append one slot per device.
    ///
    /// Registration happens once; calling again only appends slots.
    ///
    /// # Errors
    ///
    /// - `SlotError::DuplicateDevice` if a device is already registered. Slots
    ///   added before the duplicate are kept.
    pub fn initialize(
        &mut self,
        registry: &mut impl SessionRegistry,
        devices: impl IntoIterator<Item = DeviceId>,
    ) -> Result<(), SlotError> {
        if !self.registered {
            registry.register(self.id);
            self.registered = true;
        }

        for device in devices {
            self.slots.add_slot(device)?;
        }

        Ok(())
    }

    /// Participant id.
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Whether this machine controls the participant.
    pub fn is_local(&self) -> bool {
        self.finalizer.is_some()
    }

    /// Whether `initialize` has registered the participant.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Input slots.
    pub fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    /// Lock flags.
    pub fn locks(&self) -> &LockGate {
        &self.locks
    }

    /// Participant hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Mutable participant hooks.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Finalizer, present only on locally controlled replicas.
    pub fn finalizer(&self) -> Option<&LocalAuthorityFinalizer> {
        self.finalizer.as_ref()
    }

    /// Latest unresolved request for `item`.
    pub fn pending(&self, item: ItemRef) -> Option<PendingRequest> {
        self.pending.get(&item).copied()
    }

    /// Number of unresolved requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Highest request id issued so far.
    pub fn last_request_id(&self) -> u64 {
        self.last_request_id
    }

    /// Primary device: the hook's choice if it has a slot, else the first slot.
    pub fn main_device(&self) -> Option<DeviceId> {
        self.slots.main_device(self.hooks.main_device())
    }

    /// Phase of `item` given this machine's mirror.
    pub fn phase(&self, item: ItemRef, mirror: &AuthorityLedger) -> ItemPhase {
        match self.pending.get(&item).map(|p| p.intent) {
            Some(Intent::Equip { .. }) => ItemPhase::PendingGrant,
            Some(Intent::Unequip) => ItemPhase::PendingRelease,
            None if mirror.state(item).is_owned_by(self.id) => ItemPhase::Equipped,
            None => ItemPhase::Unequipped,
        }
    }

    pub(crate) fn slots_mut(&mut self) -> &mut SlotRegistry {
        &mut self.slots
    }

    pub(crate) fn locks_mut(&mut self) -> &mut LockGate {
        &mut self.locks
    }

    pub(crate) fn finalizer_mut(&mut self) -> Option<&mut LocalAuthorityFinalizer> {
        self.finalizer.as_mut()
    }

    pub(crate) fn next_request_id(&mut self) -> u64 {
        self.last_request_id += 1;
        self.last_request_id
    }

    /// Record a request, returning the one it supersedes.
    pub(crate) fn track(&mut self, item: ItemRef, request: PendingRequest) -> Option<PendingRequest> {
        self.pending.insert(item, request)
    }

    /// Put back the request a failed send superseded.
    pub(crate) fn untrack(&mut self, item: ItemRef, previous: Option<PendingRequest>) {
        match previous {
            Some(request) => self.pending.insert(item, request),
            None => self.pending.remove(&item),
        };
    }

    /// Resolve the pending request for `item` if `request_id` covers it.
    pub(crate) fn resolve(&mut self, item: ItemRef, request_id: u64) -> bool {
        match self.pending.get(&item) {
            Some(pending) if pending.request_id <= request_id => {
                self.pending.remove(&item);
                true
            },
            _ => false,
        }
    }

    /// Drop every pending request at or below `watermark`, returning the items.
    pub(crate) fn drop_through(&mut self, watermark: u64) -> Vec<ItemRef> {
        let dropped: Vec<ItemRef> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.request_id <= watermark)
            .map(|(item, _)| *item)
            .collect();

        for item in &dropped {
            self.pending.remove(item);
        }
        dropped
    }
}

impl<H: std::fmt::Debug> std::fmt::Debug for Participant<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("local", &self.finalizer.is_some())
            .field("slots", &self.slots)
            .field("locks", &self.locks)
            .field("pending", &self.pending)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
