//! Participant registry and request watermarks.
//!
//! Directed calls from one participant arrive in send order and carry strictly
//! increasing request ids, so the highest id processed so far (the watermark)
//! is enough to recognise redelivered requests. A participant's watermark is
//! forgotten when it leaves; a rejoining participant starts again from zero.

use std::collections::BTreeMap;

use handoff_core::SessionRegistry;
use handoff_proto::{ParticipantId, payloads::sync::Watermark};

/// Joined participants and the highest request id processed for each.
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    watermarks: BTreeMap<ParticipantId, u64>,
}

impl ParticipantRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant. Returns `false` if it already joined or is the
    /// reserved server id.
    pub fn join(&mut self, participant: ParticipantId) -> bool {
        if participant.is_server() || self.watermarks.contains_key(&participant) {
            return false;
        }
        self.watermarks.insert(participant, 0);
        true
    }

    /// Remove a participant. Returns `false` if it was not joined.
    pub fn leave(&mut self, participant: ParticipantId) -> bool {
        self.watermarks.remove(&participant).is_some()
    }

    /// Whether `participant` has joined.
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.watermarks.contains_key(&participant)
    }

    /// Number of joined participants.
    pub fn len(&self) -> usize {
        self.watermarks.len()
    }

    /// Whether nobody has joined.
    pub fn is_empty(&self) -> bool {
        self.watermarks.is_empty()
    }

    /// Joined participants in id order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.watermarks.keys().copied()
    }

    /// Highest request id processed for `participant`.
    pub fn watermark(&self, participant: ParticipantId) -> Option<u64> {
        self.watermarks.get(&participant).copied()
    }

    /// Record `request_id` as processed.
    ///
    /// Returns `false` for ids at or below the watermark (duplicates) and for
    /// participants that never joined.
    pub fn advance(&mut self, participant: ParticipantId, request_id: u64) -> bool {
        match self.watermarks.get_mut(&participant) {
            Some(watermark) if request_id > *watermark => {
                *watermark = request_id;
                true
            },
            _ => false,
        }
    }

    /// Watermarks of every joined participant, for snapshots.
    pub fn watermarks(&self) -> Vec<Watermark> {
        self.watermarks
            .iter()
            .map(|(participant, request_id)| Watermark {
                participant: *participant,
                request_id: *request_id,
            })
            .collect()
    }
}

impl SessionRegistry for ParticipantRegistry {
    fn register(&mut self, participant: ParticipantId) {
        if !self.join(participant) {
            tracing::debug!(participant = %participant, "participant already registered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_cannot_join() {
        let mut registry = ParticipantRegistry::new();
        assert!(!registry.join(ParticipantId::SERVER));
        assert!(registry.is_empty());
    }

    #[test]
    fn watermark_rejects_replays() {
        let mut registry = ParticipantRegistry::new();
        let p = ParticipantId(3);
        registry.join(p);

        assert!(registry.advance(p, 1));
        assert!(registry.advance(p, 5));
        assert!(!registry.advance(p, 5));
        assert!(!registry.advance(p, 2));
        assert_eq!(registry.watermark(p), Some(5));
    }

    #[test]
    fn leaving_forgets_watermark() {
        let mut registry = ParticipantRegistry::new();
        let p = ParticipantId(3);
        registry.register(p);
        registry.advance(p, 9);

        assert!(registry.leave(p));
        assert!(!registry.advance(p, 10));
        assert!(registry.join(p));
        assert!(registry.advance(p, 1));
    }

    #[test]
    fn unknown_participant_never_advances() {
        let mut registry = ParticipantRegistry::new();
        assert!(!registry.advance(ParticipantId(1), 1));
        assert_eq!(registry.watermark(ParticipantId(1)), None);
    }
}
