//! Transport-level authority handles.
//!
//! The ledger says who holds an item; the handle is the transport permission
//! that lets the holder's machine actually drive it. A handle taken from a
//! holder is not reassigned until the old holder confirms it has released the
//! item, so two machines never drive the same item at once.
//!
//! # Lifecycle
//!
//! ```text
//! Assigned(a) --revoke/unequip--> Reclaiming { from: a, next: None }
//!     --grant b--> Reclaiming { from: a, next: Some(b) }
//!     --confirm / departure / timeout--> Assigned(b)
//! ```
//!
//! A reclaim that ends by timeout is provisional: the old holder may still be
//! driving the item.

use std::{collections::BTreeMap, time::Duration};

use handoff_proto::{ItemRef, ParticipantId};

use crate::driver::ServerAction;

/// Why a handle was taken back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// The holder confirmed its release
    Confirmed,
    /// The holder left the session
    HolderDeparted,
    /// No confirmation arrived in time
    TimedOut,
}

/// State of one item's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handle<I> {
    /// The participant's machine drives the item
    Assigned(ParticipantId),
    /// Waiting for `from` to release
    Reclaiming {
        /// Holder being reclaimed from
        from: ParticipantId,
        /// Ledger revision of the release
        revision: u64,
        /// When the reclaim started
        started: I,
        /// Assignment deferred until the reclaim finishes
        next: Option<ParticipantId>,
    },
}

/// Per-item handle tracker.
#[derive(Debug)]
pub struct AuthorityHandles<I> {
    handles: BTreeMap<ItemRef, Handle<I>>,
}

impl<I> Default for AuthorityHandles<I> {
    fn default() -> Self {
        Self { handles: BTreeMap::new() }
    }
}

impl<I> AuthorityHandles<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle state of `item`. `None` means the server drives it.
    pub fn get(&self, item: ItemRef) -> Option<&Handle<I>> {
        self.handles.get(&item)
    }

    /// Participant whose machine currently drives `item`.
    pub fn assigned(&self, item: ItemRef) -> Option<ParticipantId> {
        match self.handles.get(&item) {
            Some(Handle::Assigned(participant)) => Some(*participant),
            _ => None,
        }
    }

    /// Number of reclaims waiting for confirmation.
    pub fn reclaiming(&self) -> usize {
        self.handles.values().filter(|h| matches!(h, Handle::Reclaiming { .. })).count()
    }

    /// Give `item` to `to`, or defer if a reclaim is in flight.
    pub(crate) fn assign(&mut self, item: ItemRef, to: ParticipantId) -> Vec<ServerAction> {
        match self.handles.get_mut(&item) {
            Some(Handle::Reclaiming { next, .. }) => {
                *next = Some(to);
                tracing::debug!(item = %item, participant = %to, "assignment deferred until reclaim completes");
                Vec::new()
            },
            Some(Handle::Assigned(current)) if *current == to => Vec::new(),
            _ => {
                self.handles.insert(item, Handle::Assigned(to));
                vec![ServerAction::AssignAuthority { item, participant: to }]
            },
        }
    }

    /// Start taking `item` back from `from` after a release at `revision`.
    pub(crate) fn begin_reclaim(
        &mut self,
        item: ItemRef,
        from: ParticipantId,
        revision: u64,
        now: I,
    ) {
        match self.handles.get_mut(&item) {
            Some(Handle::Assigned(current)) if *current == from => {
                self.handles.insert(
                    item,
                    Handle::Reclaiming { from, revision, started: now, next: None },
                );
            },
            // Released before the deferred assignment ever happened.
            Some(Handle::Reclaiming { next, .. }) if *next == Some(from) => {
                *next = None;
            },
            _ => {},
        }
    }

    /// Finish the reclaim of `item` if `from` confirms the pending release.
    pub(crate) fn confirm(
        &mut self,
        item: ItemRef,
        from: ParticipantId,
        revision: u64,
    ) -> Vec<ServerAction> {
        match self.handles.get(&item) {
            Some(Handle::Reclaiming { from: holder, revision: pending, .. })
                if *holder == from && revision >= *pending =>
            {
                self.finish(item, ReclaimReason::Confirmed)
            },
            _ => {
                tracing::debug!(item = %item, participant = %from, revision, "confirmation does not match a reclaim");
                Vec::new()
            },
        }
    }

    /// Reclaim everything `participant` holds or is owed, immediately.
    pub(crate) fn holder_departed(&mut self, participant: ParticipantId) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let items: Vec<ItemRef> = self.handles.keys().copied().collect();

        for item in items {
            match self.handles.get_mut(&item) {
                Some(Handle::Assigned(holder)) if *holder == participant => {
                    self.handles.remove(&item);
                    actions.push(ServerAction::ReclaimAuthority {
                        item,
                        participant,
                        reason: ReclaimReason::HolderDeparted,
                    });
                },
                Some(Handle::Reclaiming { from, .. }) if *from == participant => {
                    actions.extend(self.finish(item, ReclaimReason::HolderDeparted));
                },
                Some(Handle::Reclaiming { next, .. }) if *next == Some(participant) => {
                    *next = None;
                },
                _ => {},
            }
        }

        actions
    }

    /// Finish every reclaim older than `timeout`.
    pub(crate) fn expire(&mut self, now: I, timeout: Duration) -> Vec<ServerAction> {
        let expired: Vec<ItemRef> = self
            .handles
            .iter()
            .filter(|(_, handle)| match handle {
                Handle::Reclaiming { started, .. } => now - *started >= timeout,
                Handle::Assigned(_) => false,
            })
            .map(|(item, _)| *item)
            .collect();

        let mut actions = Vec::new();
        for item in expired {
            if let Some(Handle::Reclaiming { from, revision, .. }) = self.handles.get(&item) {
                tracing::warn!(
                    item = %item,
                    participant = %from,
                    revision = *revision,
                    "release not confirmed in time; reclaim is provisional"
                );
            }
            actions.extend(self.finish(item, ReclaimReason::TimedOut));
        }
        actions
    }

    fn finish(&mut self, item: ItemRef, reason: ReclaimReason) -> Vec<ServerAction> {
        let Some(Handle::Reclaiming { from, next, .. }) = self.handles.remove(&item) else {
            return Vec::new();
        };

        let mut actions =
            vec![ServerAction::ReclaimAuthority { item, participant: from, reason }];

        if let Some(to) = next {
            self.handles.insert(item, Handle::Assigned(to));
            actions.push(ServerAction::AssignAuthority { item, participant: to });
        }

        actions
    }
}
