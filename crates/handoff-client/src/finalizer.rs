//! Local authority finalizer.
//!
//! Only a participant controlled by this machine carries one; remote replicas
//! have no way to touch item authority. The finalizer remembers which items it
//! took control of so that a release only undoes what a grant did.

use std::collections::BTreeSet;

use handoff_core::{DeviceId, ItemDirectory};
use handoff_proto::{
    Frame, ItemRef, ParticipantId, Payload, ProtocolError, payloads::authority::ConfirmRelease,
};

/// Completes handoffs on the holder's own machine.
#[derive(Debug, Default)]
pub struct LocalAuthorityFinalizer {
    controlled: BTreeSet<ItemRef>,
}

impl LocalAuthorityFinalizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether this machine currently drives `item`.
    pub fn controls(&self, item: ItemRef) -> bool {
        self.controlled.contains(&item)
    }

    /// Items under local control, in item order.
    pub fn controlled(&self) -> impl Iterator<Item = ItemRef> + '_ {
        self.controlled.iter().copied()
    }

    /// Run the item's equip hook, then take local control.
    ///
    /// Returns false if the item cannot be resolved on this machine.
    pub(crate) fn take_control(
        &mut self,
        holder: ParticipantId,
        device: DeviceId,
        item: ItemRef,
        items: &mut dyn ItemDirectory,
    ) -> bool {
        if self.controlled.contains(&item) {
            return true;
        }

        let Some(target) = items.resolve(item) else {
            return false;
        };

        target.on_equip(holder, device);
        target.take_local_control();
        self.controlled.insert(item);

        tracing::debug!(participant = %holder, item = %item, device = %device, "took local control");
        true
    }

    /// Run the item's unequip hook, then release authority.
    ///
    /// No-op for items this finalizer never took control of.
    pub(crate) fn release_control(
        &mut self,
        holder: ParticipantId,
        item: ItemRef,
        items: &mut dyn ItemDirectory,
    ) {
        if !self.controlled.remove(&item) {
            return;
        }

        match items.resolve(item) {
            Some(target) => {
                target.on_unequip();
                target.release_authority();
                tracing::debug!(participant = %holder, item = %item, "released local control");
            },
            None => {
                tracing::error!(
                    participant = %holder,
                    item = %item,
                    "item vanished while under local control"
                );
            },
        }
    }

    /// Frame telling the server the release of `item` at `revision` is done.
    pub(crate) fn confirm_release(
        &self,
        holder: ParticipantId,
        item: ItemRef,
        revision: u64,
    ) -> Result<Frame, ProtocolError> {
        Payload::ConfirmRelease(ConfirmRelease { item, revision }).into_frame(holder)
    }
}
