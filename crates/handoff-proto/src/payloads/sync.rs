//! Ledger resynchronisation payloads.

use serde::{Deserialize, Serialize};

use crate::{ItemRef, ParticipantId};

/// Ask the server to broadcast its full ledger.
///
/// Carries a request id like any other request, so the snapshot's watermark
/// for the sender covers every request sent before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestResync {
    /// Per-participant, strictly increasing request id.
    pub request_id: u64,
}

/// Full ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnnounceSnapshot {
    /// Every registered item with its holder and revision.
    pub records: Vec<LedgerRecord>,
    /// Highest request id processed per participant.
    pub watermarks: Vec<Watermark>,
}

impl AnnounceSnapshot {
    /// Most entries (records plus watermarks) carried by one frame.
    ///
    /// A worst-case record or watermark encodes to under 50 bytes, so a full
    /// part stays below `FrameHeader::MAX_PAYLOAD_SIZE`.
    pub const MAX_ENTRIES_PER_PART: usize = 1024;

    /// Number of records and watermarks carried.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len() + self.watermarks.len()
    }

    /// Whether the snapshot carries nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.watermarks.is_empty()
    }

    /// Split into parts that each fit in one frame.
    ///
    /// Records keep their order and fill the leading parts. Watermarks follow
    /// the last record, so a receiver applying parts in order has seen every
    /// record before any pending request is dropped through a watermark.
    /// Always returns at least one part.
    #[must_use]
    pub fn into_parts(self) -> Vec<Self> {
        let mut parts = Vec::with_capacity(self.len() / Self::MAX_ENTRIES_PER_PART + 1);
        let mut current = Self::default();

        for record in self.records {
            if current.len() == Self::MAX_ENTRIES_PER_PART {
                parts.push(std::mem::take(&mut current));
            }
            current.records.push(record);
        }

        for mark in self.watermarks {
            if current.len() == Self::MAX_ENTRIES_PER_PART {
                parts.push(std::mem::take(&mut current));
            }
            current.watermarks.push(mark);
        }

        parts.push(current);
        parts
    }
}

/// One ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Item.
    pub item: ItemRef,
    /// Holder, `None` if unowned.
    pub holder: Option<ParticipantId>,
    /// Ledger revision.
    pub revision: u64,
}

/// Highest request id the server has processed for a participant.
///
/// Requests from one participant are processed in send order, so every
/// request at or below the watermark was either processed or lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Participant.
    pub participant: ParticipantId,
    /// Highest processed request id.
    pub request_id: u64,
}
