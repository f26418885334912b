//! Interfaces to the systems the protocol drives but does not own.
//!
//! The session registry, the concrete items and their behaviour, the
//! participant's presentation hooks and the transport all live outside this
//! workspace. The client and server are written against these traits only.

use handoff_proto::{Frame, ItemRef, ParticipantId};

use crate::{error::LinkError, slot::DeviceId};

/// Session-wide registry of participants.
pub trait SessionRegistry {
    /// Record that `participant` joined. Called once per participant.
    fn register(&mut self, participant: ParticipantId);
}

/// A shared object whose authority moves between participants.
///
/// Only the holder's machine calls these, in protocol order:
/// `on_equip` then `take_local_control` on a grant, `on_unequip` then
/// `release_authority` on a release.
pub trait Item {
    /// Item-side equip behaviour on the holder's machine.
    fn on_equip(&mut self, holder: ParticipantId, device: DeviceId);

    /// Item-side unequip behaviour on the holder's machine.
    fn on_unequip(&mut self);

    /// Start driving the item's replicated state from this machine.
    fn take_local_control(&mut self);

    /// Stop driving the item's replicated state.
    fn release_authority(&mut self);
}

/// Resolves network item references to local items.
pub trait ItemDirectory {
    /// Local item for `item`, or `None` if this machine cannot resolve it.
    fn resolve(&mut self, item: ItemRef) -> Option<&mut dyn Item>;
}

/// Presentation hooks of a participant, run on every replica.
pub trait ParticipantHooks {
    /// `item` was granted to this participant. `device` is only known on the
    /// holder's own machine.
    fn on_equip(&mut self, device: Option<DeviceId>, item: ItemRef);

    /// `item` was released by this participant.
    fn on_unequip(&mut self, item: ItemRef);

    /// Preferred device for main-hand equips.
    fn main_device(&self) -> Option<DeviceId> {
        None
    }
}

/// Directed client to server call.
///
/// Ordered per sender and at-least-once. Delivery is not confirmed; the
/// caller learns the outcome only from broadcasts.
pub trait ServerLink {
    /// Hand `frame` to the transport.
    fn call_server(&mut self, frame: Frame) -> Result<(), LinkError>;
}

/// Server to every machine broadcast, delivered in issue order.
pub trait BroadcastLink {
    /// Hand `frame` to the transport.
    fn broadcast(&mut self, frame: Frame) -> Result<(), LinkError>;
}
