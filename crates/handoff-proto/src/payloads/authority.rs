//! Authority transfer payloads.
//!
//! Requests travel from a participant to the server; announcements travel
//! from the server to every machine. Announcements carry the item's ledger
//! revision so replicas can discard redelivered or stale broadcasts.

use serde::{Deserialize, Serialize};

use crate::{ItemRef, ParticipantId};

/// Ask the server for exclusive authority over an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEquip {
    /// Item to equip.
    pub item: ItemRef,
    /// Per-participant, strictly increasing request id.
    pub request_id: u64,
}

/// Ask the server to release the sender's authority over an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUnequip {
    /// Item to release.
    pub item: ItemRef,
    /// Per-participant, strictly increasing request id.
    pub request_id: u64,
}

/// The previous holder finished its local release hooks.
///
/// Until this arrives the server keeps the item's transport-level handle with
/// the previous holder, so no other machine can write while the holder is
/// still tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRelease {
    /// Item that was released.
    pub item: ItemRef,
    /// Ledger revision of the release the holder processed.
    pub revision: u64,
}

/// Item is now held by `holder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceEquip {
    /// Item that changed hands.
    pub item: ItemRef,
    /// New authority holder.
    pub holder: ParticipantId,
    /// Ledger revision after the grant.
    pub revision: u64,
    /// The holder's request that caused the grant.
    pub request_id: u64,
}

/// Item is no longer held by `holder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceUnequip {
    /// Item that was released.
    pub item: ItemRef,
    /// Participant that held the item until now.
    pub holder: ParticipantId,
    /// Ledger revision after the release.
    pub revision: u64,
    /// Why the holder lost authority.
    pub cause: ReleaseCause,
}

/// Why a holder lost authority over an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseCause {
    /// The holder asked to unequip.
    Requested {
        /// The holder's unequip request.
        request_id: u64,
    },
    /// Another participant took the item over.
    Revoked {
        /// Participant the item is about to be granted to.
        by: ParticipantId,
    },
    /// The holder left the session.
    Departed,
}

/// A request was refused; the ledger did not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceRejected {
    /// Item named by the refused request.
    pub item: ItemRef,
    /// Participant whose request was refused.
    pub requester: ParticipantId,
    /// The refused request.
    pub request_id: u64,
    /// Why it was refused.
    pub reason: RejectReason,
}

/// Why the server refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The server does not know the item.
    UnknownItem,
    /// Another participant holds the item and the conflict policy keeps it.
    HeldByOther {
        /// Current holder.
        holder: ParticipantId,
    },
    /// Unequip from a participant that does not hold the item.
    NotHolder,
}
