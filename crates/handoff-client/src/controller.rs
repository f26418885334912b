//! Equip/unequip controller for one machine.
//!
//! Local operations validate against the lock gate and slot occupancy, bind
//! optimistically and call the server. Broadcasts are applied to the mirror as
//! transitions; whatever replica loses an item runs the release path and
//! whatever replica gains it runs the grant path. No operation waits for a
//! reply.
//!
//! # Binding reconciliation
//!
//! On a locally controlled replica, after every transition, rejection or
//! watermark the binding of the affected item is reconciled:
//!
//! - a pending request wins: bound for an equip, unbound for an unequip
//! - otherwise the binding follows the mirror; a grant for an item that is
//!   neither bound nor requested is an orphan and may be handed back
//!
//! Local control follows the binding: the finalizer drives an item exactly when
//! the mirror says the participant holds it and a slot binds it.

use std::collections::{BTreeMap, BTreeSet};

use handoff_core::{
    AuthorityLedger, AuthorityState, DeviceId, InputSlot, ItemDirectory, Lock, ParticipantHooks,
    ServerLink, SlotError, Transition,
};
use handoff_proto::{
    Frame, ItemRef, ParticipantId, Payload,
    payloads::{
        authority::{AnnounceRejected, ReleaseCause, RequestEquip, RequestUnequip},
        sync::{AnnounceSnapshot, RequestResync},
    },
};

use crate::{
    config::ControllerConfig,
    error::ControllerError,
    participant::{Intent, ItemPhase, Participant, PendingRequest},
};

/// Protocol driver for every participant replica on one machine.
pub struct Controller<L, H> {
    link: L,
    config: ControllerConfig,
    mirror: AuthorityLedger,
    participants: BTreeMap<ParticipantId, Participant<H>>,
    unresolved: BTreeSet<ItemRef>,
}

impl<L: ServerLink, H: ParticipantHooks> Controller<L, H> {
    /// Create a controller sending directed calls through `link`.
    pub fn new(link: L, config: ControllerConfig) -> Self {
        Self {
            link,
            config,
            mirror: AuthorityLedger::new(),
            participants: BTreeMap::new(),
            unresolved: BTreeSet::new(),
        }
    }

    /// Add a replica, returning the one it replaced.
    pub fn insert_participant(&mut self, participant: Participant<H>) -> Option<Participant<H>> {
        self.participants.insert(participant.id(), participant)
    }

    /// Drop a replica. Items under local control are released on this
    /// machine without notifying the server.
    pub fn remove_participant(
        &mut self,
        id: ParticipantId,
        items: &mut impl ItemDirectory,
    ) -> Option<Participant<H>> {
        let mut participant = self.participants.remove(&id)?;

        if let Some(finalizer) = participant.finalizer_mut() {
            let held: Vec<ItemRef> = finalizer.controlled().collect();
            for item in held {
                finalizer.release_control(id, item, items);
            }
        }

        tracing::info!(participant = %id, "replica removed");
        Some(participant)
    }

    /// Replica of `id`.
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant<H>> {
        self.participants.get(&id)
    }

    /// Mutable replica of `id`.
    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<&mut Participant<H>> {
        self.participants.get_mut(&id)
    }

    /// All replicas in id order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant<H>> {
        self.participants.values()
    }

    /// This machine's copy of the server ledger.
    pub fn mirror(&self) -> &AuthorityLedger {
        &self.mirror
    }

    /// Controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Transport link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable transport link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Items whose announcements could not be resolved and await a resync.
    pub fn unresolved(&self) -> impl Iterator<Item = ItemRef> + '_ {
        self.unresolved.iter().copied()
    }

    /// Phase of `item` for participant `id`.
    pub fn phase(&self, id: ParticipantId, item: ItemRef) -> Option<ItemPhase> {
        self.participants.get(&id).map(|participant| participant.phase(item, &self.mirror))
    }

    /// Equip `item` on the slot of `device`.
    ///
    /// If the slot holds another item and `replace_if_occupied` is set, that
    /// item is unequipped first in its own round.
    ///
    /// # Errors
    ///
    /// - `NotLocal` / `UnknownParticipant` if this machine cannot act for `id`
    /// - `Locked` if equip changes are locked
    /// - `Slot(UnknownDevice)` if the device has no slot
    /// - `AlreadyEquipped` if the slot already holds `item`
    /// - `Slot(ItemAlreadyBound)` if another slot holds `item`
    /// - `SlotOccupied` if the slot is occupied and replacing is not allowed
    /// - `Transport` if the call failed; the binding is rolled back
    pub fn equip(
        &mut self,
        id: ParticipantId,
        device: DeviceId,
        item: ItemRef,
        replace_if_occupied: bool,
    ) -> Result<(), ControllerError> {
        let result = self.try_equip(id, device, item, replace_if_occupied);
        if let Err(err) = &result {
            tracing::warn!(participant = %id, item = %item, device = %device, error = %err, "equip rejected");
        }
        result
    }

    /// Equip `item` on the participant's main device.
    pub fn equip_main(
        &mut self,
        id: ParticipantId,
        item: ItemRef,
        replace_if_occupied: bool,
    ) -> Result<(), ControllerError> {
        let participant = local_mut(&mut self.participants, id)?;
        let device = participant.main_device().ok_or(ControllerError::NoMainDevice(id))?;
        self.equip(id, device, item, replace_if_occupied)
    }

    fn try_equip(
        &mut self,
        id: ParticipantId,
        device: DeviceId,
        item: ItemRef,
        replace_if_occupied: bool,
    ) -> Result<(), ControllerError> {
        let participant = local_mut(&mut self.participants, id)?;
        participant.locks().ensure_unlocked(Lock::EquipChange)?;

        let current = participant
            .slots()
            .find_by_device(device)
            .map(InputSlot::item)
            .ok_or(SlotError::UnknownDevice(device))?;

        if current == Some(item) {
            return Err(ControllerError::AlreadyEquipped { item, device });
        }
        if let Some(other) = participant.slots().find_by_item(item) {
            return Err(SlotError::ItemAlreadyBound { item, device: other.device() }.into());
        }

        if let Some(current) = current {
            if !replace_if_occupied {
                return Err(ControllerError::SlotOccupied { device, current });
            }
            unequip_bound(&mut self.link, participant, current)?;
        }

        participant.slots_mut().bind(device, item)?;
        if let Err(err) = send_request(&mut self.link, participant, item, Intent::Equip { device }) {
            participant.slots_mut().unbind(item);
            return Err(err);
        }

        tracing::debug!(participant = %id, item = %item, device = %device, "equip requested");
        Ok(())
    }

    /// Unequip `item` from whichever slot holds it.
    ///
    /// # Errors
    ///
    /// - `NotEquipped` if no slot of the participant holds `item`; no call
    ///   is made
    /// - `Locked` if equip changes are locked
    /// - `Transport` if the call failed; the binding is restored
    pub fn unequip(&mut self, id: ParticipantId, item: ItemRef) -> Result<(), ControllerError> {
        let result = local_mut(&mut self.participants, id).and_then(|participant| {
            participant.locks().ensure_unlocked(Lock::EquipChange)?;
            unequip_bound(&mut self.link, participant, item)
        });

        if let Err(err) = &result {
            tracing::warn!(participant = %id, item = %item, error = %err, "unequip rejected");
        }
        result
    }

    /// Unequip every bound item, one independent round each.
    ///
    /// Returns the items whose rounds started. A failed call for one item is
    /// logged and does not stop the others.
    pub fn unequip_all(&mut self, id: ParticipantId) -> Result<Vec<ItemRef>, ControllerError> {
        let participant = local_mut(&mut self.participants, id)?;
        participant.locks().ensure_unlocked(Lock::EquipChange)?;
        Ok(unequip_each(&mut self.link, participant))
    }

    /// Unequip whatever the slot of `device` holds.
    ///
    /// Returns the item unequipped, or `None` if the slot was empty.
    pub fn unequip_from(
        &mut self,
        id: ParticipantId,
        device: DeviceId,
    ) -> Result<Option<ItemRef>, ControllerError> {
        let participant = local_mut(&mut self.participants, id)?;
        participant.locks().ensure_unlocked(Lock::EquipChange)?;

        let bound = participant
            .slots()
            .find_by_device(device)
            .map(InputSlot::item)
            .ok_or(SlotError::UnknownDevice(device))?;

        let Some(item) = bound else {
            return Ok(None);
        };

        unequip_bound(&mut self.link, participant, item)?;
        Ok(Some(item))
    }

    /// Unequip everything on the way out of the session, ignoring locks.
    pub fn leave(&mut self, id: ParticipantId) -> Result<Vec<ItemRef>, ControllerError> {
        let participant = local_mut(&mut self.participants, id)?;
        let released = unequip_each(&mut self.link, participant);
        tracing::info!(participant = %id, items = released.len(), "participant leaving");
        Ok(released)
    }

    /// Set or clear a lock flag. Rounds already in flight are not affected.
    pub fn set_lock(
        &mut self,
        id: ParticipantId,
        lock: Lock,
        locked: bool,
    ) -> Result<(), ControllerError> {
        let participant = local_mut(&mut self.participants, id)?;
        participant.locks_mut().set(lock, locked);
        tracing::debug!(participant = %id, lock = %lock, locked, "lock changed");
        Ok(())
    }

    /// Ask the server for a full ledger snapshot.
    ///
    /// Sent on behalf of the first locally controlled participant.
    ///
    /// # Errors
    ///
    /// - `NoLocalParticipant` if this machine controls nobody
    /// - `Transport` if the call failed
    pub fn request_resync(&mut self) -> Result<(), ControllerError> {
        let participant = self
            .participants
            .values_mut()
            .find(|participant| participant.is_local())
            .ok_or(ControllerError::NoLocalParticipant)?;

        let request_id = participant.next_request_id();
        let frame =
            Payload::RequestResync(RequestResync { request_id }).into_frame(participant.id())?;
        self.link.call_server(frame)?;

        tracing::info!(participant = %participant.id(), request_id, "resync requested");
        Ok(())
    }

    /// Apply a server broadcast.
    ///
    /// # Errors
    ///
    /// - `Protocol` if the frame does not decode
    /// - `UnexpectedFrame` for request opcodes or frames not sent by the server
    /// - `MissingItem` if an announcement names an item `items` cannot
    ///   resolve; that announcement is dropped and the mirror left stale. For a
    ///   snapshot the remaining records are still applied.
    pub fn handle_frame(
        &mut self,
        frame: &Frame,
        items: &mut impl ItemDirectory,
    ) -> Result<(), ControllerError> {
        let payload = Payload::from_frame(frame)?;
        let opcode = payload.opcode();
        let sender = frame.header.sender();

        if !sender.is_server() {
            return Err(ControllerError::UnexpectedFrame { opcode, sender });
        }

        match payload {
            Payload::AnnounceEquip(announce) => self.apply_announcement(
                announce.item,
                AuthorityState::Owned(announce.holder),
                announce.revision,
                Some((announce.holder, announce.request_id)),
                items,
            ),
            Payload::AnnounceUnequip(announce) => {
                let resolves = match announce.cause {
                    ReleaseCause::Requested { request_id } => Some((announce.holder, request_id)),
                    ReleaseCause::Revoked { by } => {
                        tracing::info!(item = %announce.item, holder = %announce.holder, by = %by, "authority revoked");
                        None
                    },
                    ReleaseCause::Departed => None,
                };
                self.apply_announcement(
                    announce.item,
                    AuthorityState::Unowned,
                    announce.revision,
                    resolves,
                    items,
                )
            },
            Payload::AnnounceRejected(rejected) => {
                self.apply_rejection(rejected, items);
                Ok(())
            },
            Payload::AnnounceSnapshot(snapshot) => self.apply_snapshot(snapshot, items),
            Payload::RequestEquip(_)
            | Payload::RequestUnequip(_)
            | Payload::ConfirmRelease(_)
            | Payload::RequestResync(_) => Err(ControllerError::UnexpectedFrame { opcode, sender }),
        }
    }

    fn apply_announcement(
        &mut self,
        item: ItemRef,
        state: AuthorityState,
        revision: u64,
        resolves: Option<(ParticipantId, u64)>,
        items: &mut dyn ItemDirectory,
    ) -> Result<(), ControllerError> {
        if revision <= self.mirror.revision(item) {
            tracing::debug!(item = %item, revision, "stale announcement ignored");
            return Ok(());
        }

        if items.resolve(item).is_none() {
            return Err(self.missing_item(item));
        }
        self.unresolved.remove(&item);

        let Some(transition) = self.mirror.apply(item, state, revision) else {
            return Ok(());
        };

        if let Some((requester, request_id)) = resolves
            && let Some(participant) = self.participants.get_mut(&requester)
        {
            participant.resolve(item, request_id);
        }

        self.run_transition(transition, items);
        Ok(())
    }

    fn missing_item(&mut self, item: ItemRef) -> ControllerError {
        tracing::error!(item = %item, "announcement names an item this machine cannot resolve");

        if self.config.resync_on_missing_item && self.unresolved.insert(item) {
            if let Err(err) = self.request_resync() {
                tracing::warn!(item = %item, error = %err, "resync request failed");
                self.unresolved.remove(&item);
            }
        }

        ControllerError::MissingItem(item)
    }

    fn run_transition(&mut self, transition: Transition, items: &mut dyn ItemDirectory) {
        if let Some(previous) = transition.released() {
            self.release_path(previous, transition, items);
        }

        match (transition.granted(), transition.current.holder()) {
            (Some(holder), _) => self.grant_path(holder, transition.item, items),
            // Re-grant to the same holder: no hooks, just make sure control matches.
            (None, Some(holder)) => {
                if let Some(participant) = self.participants.get_mut(&holder)
                    && participant.is_local()
                {
                    reconcile(
                        participant,
                        &self.mirror,
                        &mut self.link,
                        &self.config,
                        transition.item,
                        items,
                    );
                }
            },
            (None, None) => {},
        }
    }

    fn release_path(
        &mut self,
        holder: ParticipantId,
        transition: Transition,
        items: &mut dyn ItemDirectory,
    ) {
        let item = transition.item;
        let Some(participant) = self.participants.get_mut(&holder) else {
            return;
        };

        participant.hooks_mut().on_unequip(item);
        if !participant.is_local() {
            return;
        }

        reconcile(participant, &self.mirror, &mut self.link, &self.config, item, items);

        let Some(finalizer) = participant.finalizer() else {
            return;
        };
        let sent = finalizer
            .confirm_release(holder, item, transition.revision)
            .map_err(ControllerError::from)
            .and_then(|frame| self.link.call_server(frame).map_err(ControllerError::from));

        if let Err(err) = sent {
            tracing::warn!(participant = %holder, item = %item, error = %err, "release confirmation not sent");
        }
    }

    fn grant_path(&mut self, holder: ParticipantId, item: ItemRef, items: &mut dyn ItemDirectory) {
        let Some(participant) = self.participants.get_mut(&holder) else {
            return;
        };

        let device = if participant.is_local() {
            reconcile(participant, &self.mirror, &mut self.link, &self.config, item, items);
            participant.slots().find_by_item(item).map(InputSlot::device)
        } else {
            None
        };

        participant.hooks_mut().on_equip(device, item);
    }

    fn apply_rejection(&mut self, rejected: AnnounceRejected, items: &mut dyn ItemDirectory) {
        let Some(participant) = self.participants.get_mut(&rejected.requester) else {
            return;
        };

        if !participant.resolve(rejected.item, rejected.request_id) {
            return;
        }

        tracing::warn!(
            participant = %rejected.requester,
            item = %rejected.item,
            request_id = rejected.request_id,
            reason = ?rejected.reason,
            "request rejected by server"
        );

        if participant.is_local() {
            reconcile(participant, &self.mirror, &mut self.link, &self.config, rejected.item, items);
        }
    }

    fn apply_snapshot(
        &mut self,
        snapshot: AnnounceSnapshot,
        items: &mut dyn ItemDirectory,
    ) -> Result<(), ControllerError> {
        let mut first_missing = None;

        for record in snapshot.records {
            let state = AuthorityState::from_holder(record.holder);
            if let Err(err) = self.apply_announcement(record.item, state, record.revision, None, items)
            {
                first_missing.get_or_insert(err);
            }
        }

        for mark in snapshot.watermarks {
            let Some(participant) = self.participants.get_mut(&mark.participant) else {
                continue;
            };
            if !participant.is_local() {
                continue;
            }

            for item in participant.drop_through(mark.request_id) {
                tracing::debug!(participant = %mark.participant, item = %item, "pending request covered by watermark");
                reconcile(participant, &self.mirror, &mut self.link, &self.config, item, items);
            }
        }

        tracing::info!(items = self.mirror.len(), "snapshot applied");
        first_missing.map_or(Ok(()), Err)
    }
}

fn local_mut<H: ParticipantHooks>(
    participants: &mut BTreeMap<ParticipantId, Participant<H>>,
    id: ParticipantId,
) -> Result<&mut Participant<H>, ControllerError> {
    let participant =
        participants.get_mut(&id).ok_or(ControllerError::UnknownParticipant(id))?;

    if !participant.is_local() {
        return Err(ControllerError::NotLocal(id));
    }
    Ok(participant)
}

/// Track and send a request. The pending entry is undone if the call fails.
fn send_request<L: ServerLink, H: ParticipantHooks>(
    link: &mut L,
    participant: &mut Participant<H>,
    item: ItemRef,
    intent: Intent,
) -> Result<u64, ControllerError> {
    let request_id = participant.next_request_id();
    let payload = match intent {
        Intent::Equip { .. } => Payload::RequestEquip(RequestEquip { item, request_id }),
        Intent::Unequip => Payload::RequestUnequip(RequestUnequip { item, request_id }),
    };
    let frame = payload.into_frame(participant.id())?;

    let superseded = participant.track(item, PendingRequest { request_id, intent });
    if let Err(err) = link.call_server(frame) {
        participant.untrack(item, superseded);
        return Err(err.into());
    }

    Ok(request_id)
}

/// Clear the binding of `item` and request its release.
fn unequip_bound<L: ServerLink, H: ParticipantHooks>(
    link: &mut L,
    participant: &mut Participant<H>,
    item: ItemRef,
) -> Result<(), ControllerError> {
    let device = participant.slots_mut().unbind(item).ok_or(ControllerError::NotEquipped(item))?;

    if let Err(err) = send_request(link, participant, item, Intent::Unequip) {
        // The slot was cleared just above, so rebinding cannot conflict.
        if let Err(bind_err) = participant.slots_mut().bind(device, item) {
            tracing::error!(
                participant = %participant.id(),
                item = %item,
                device = %device,
                error = %bind_err,
                "cannot restore binding after failed unequip"
            );
        }
        return Err(err);
    }

    tracing::debug!(participant = %participant.id(), item = %item, device = %device, "unequip requested");
    Ok(())
}

fn unequip_each<L: ServerLink, H: ParticipantHooks>(
    link: &mut L,
    participant: &mut Participant<H>,
) -> Vec<ItemRef> {
    let bound: Vec<ItemRef> = participant.slots().bound_items().collect();

    bound
        .into_iter()
        .filter(|item| match unequip_bound(link, participant, *item) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(participant = %participant.id(), item = %item, error = %err, "unequip failed");
                false
            },
        })
        .collect()
}

/// Bring the binding and local control of `item` in line with the pending
/// request or, failing that, the mirror.
fn reconcile<L: ServerLink, H: ParticipantHooks>(
    participant: &mut Participant<H>,
    mirror: &AuthorityLedger,
    link: &mut L,
    config: &ControllerConfig,
    item: ItemRef,
    items: &mut dyn ItemDirectory,
) {
    let id = participant.id();
    let owned = mirror.state(item).is_owned_by(id);

    match participant.pending(item).map(|pending| pending.intent) {
        Some(Intent::Equip { device }) => {
            let slot_free = participant
                .slots()
                .find_by_device(device)
                .is_some_and(|slot| !slot.is_occupied());
            if slot_free
                && !participant.slots().is_item_bound(item)
                && let Err(err) = participant.slots_mut().bind(device, item)
            {
                tracing::error!(
                    participant = %id,
                    item = %item,
                    device = %device,
                    error = %err,
                    "cannot rebind item for pending equip"
                );
            }
        },
        Some(Intent::Unequip) => {
            participant.slots_mut().unbind(item);
        },
        None if !owned => {
            participant.slots_mut().unbind(item);
        },
        None if !participant.slots().is_item_bound(item) => {
            if config.release_orphaned_grants {
                tracing::warn!(participant = %id, item = %item, "handing back orphaned grant");
                if let Err(err) = send_request(link, participant, item, Intent::Unequip) {
                    tracing::warn!(participant = %id, item = %item, error = %err, "orphan release not sent");
                }
            } else {
                tracing::warn!(participant = %id, item = %item, "orphaned grant kept");
            }
        },
        None => {},
    }

    let bound = participant.slots().find_by_item(item).map(InputSlot::device);
    let Some(finalizer) = participant.finalizer_mut() else {
        return;
    };

    match bound {
        Some(device) if owned => {
            if !finalizer.take_control(id, device, item, items) {
                tracing::error!(participant = %id, item = %item, "cannot take control of unresolved item");
            }
        },
        _ => finalizer.release_control(id, item, items),
    }
}
