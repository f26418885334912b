//! Server driver.
//!
//! Owns the authoritative ledger and arbitrates every request against it.
//! Each accepted change is answered with a broadcast so every machine's mirror
//! follows the ledger; handle changes are reported separately so the host can
//! move transport-level ownership.

use std::time::Duration;

use handoff_core::{AuthorityLedger, AuthorityState, Environment};
use handoff_proto::{
    Frame, ItemRef, Opcode, ParticipantId, Payload,
    payloads::{
        authority::{
            AnnounceEquip, AnnounceRejected, AnnounceUnequip, ConfirmRelease, RejectReason,
            ReleaseCause, RequestEquip, RequestUnequip,
        },
        sync::{AnnounceSnapshot, RequestResync},
    },
};

use crate::{
    error::ServerError,
    handles::{AuthorityHandles, ReclaimReason},
    registry::ParticipantRegistry,
};

/// How the server resolves an equip request for an item someone else holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Revoke from the current holder, then grant to the requester
    #[default]
    LastWriteWins,
    /// Reject the request with `HeldByOther`
    FirstComeFirstServed,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Resolution of competing equip requests
    pub conflict_policy: ConflictPolicy,
    /// How long a reclaim waits for `ConfirmRelease` before completing anyway
    pub release_timeout: Duration,
    /// Maximum joined participants
    pub max_participants: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            release_timeout: Duration::from_secs(2),
            max_participants: 1024,
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (simulation or production).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A participant joined the session
    ParticipantJoined {
        /// Joining participant
        participant: ParticipantId,
    },

    /// A directed call arrived from a participant
    FrameReceived {
        /// Participant the runtime received the frame from
        from: ParticipantId,
        /// The received frame
        frame: Frame,
    },

    /// A participant left (by request or disconnect)
    ParticipantLeft {
        /// Departing participant
        participant: ParticipantId,
    },

    /// Periodic tick for reclaim timeouts
    Tick,
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code (production or simulation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Deliver a frame to every machine
    Broadcast(Frame),

    /// Let the participant's machine drive the item
    AssignAuthority {
        /// Item
        item: ItemRef,
        /// New handle holder
        participant: ParticipantId,
    },

    /// Take the item's handle back from the participant's machine
    ReclaimAuthority {
        /// Item
        item: ItemRef,
        /// Previous handle holder
        participant: ParticipantId,
        /// What ended the reclaim
        reason: ReclaimReason,
    },
}

/// Action-based server driver.
///
/// Orchestrates participant membership, ledger arbitration, and handle
/// tracking. Performs no I/O.
pub struct ServerDriver<E: Environment> {
    /// Authoritative item ledger
    ledger: AuthorityLedger,
    /// Joined participants and request watermarks
    registry: ParticipantRegistry,
    /// Transport-level handles
    handles: AuthorityHandles<E::Instant>,
    /// Environment (time)
    env: E,
    /// Server configuration
    config: ServerConfig,
}

impl<E: Environment> ServerDriver<E> {
    /// Create a new server driver.
    pub fn new(env: E, config: ServerConfig) -> Self {
        Self {
            ledger: AuthorityLedger::new(),
            registry: ParticipantRegistry::new(),
            handles: AuthorityHandles::new(),
            env,
            config,
        }
    }

    /// Make `item` known to the server. Returns `false` if it already was.
    pub fn register_item(&mut self, item: ItemRef) -> bool {
        self.ledger.register(item)
    }

    /// The authoritative ledger.
    pub fn ledger(&self) -> &AuthorityLedger {
        &self.ledger
    }

    /// Joined participants.
    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    /// Mutable registry, for hosts that join participants through
    /// [`handoff_core::SessionRegistry`].
    pub fn registry_mut(&mut self) -> &mut ParticipantRegistry {
        &mut self.registry
    }

    /// Transport-level handle state.
    pub fn handles(&self) -> &AuthorityHandles<E::Instant> {
        &self.handles
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current ledger and watermarks as a snapshot payload.
    pub fn snapshot(&self) -> AnnounceSnapshot {
        AnnounceSnapshot { records: self.ledger.records(), watermarks: self.registry.watermarks() }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    ///
    /// # Errors
    ///
    /// Errors reject the event as a whole; no state changes and no actions are
    /// produced for it.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ParticipantJoined { participant } => self.handle_joined(participant),
            ServerEvent::FrameReceived { from, frame } => self.handle_frame(from, &frame),
            ServerEvent::ParticipantLeft { participant } => self.handle_left(participant),
            ServerEvent::Tick => Ok(self.handle_tick()),
        }
    }

    fn handle_joined(&mut self, participant: ParticipantId) -> Result<Vec<ServerAction>, ServerError> {
        if self.registry.len() >= self.config.max_participants {
            return Err(ServerError::TooManyParticipants { max: self.config.max_participants });
        }

        if !self.registry.join(participant) {
            return Err(ServerError::AlreadyJoined(participant));
        }

        tracing::debug!(participant = %participant, "participant joined");
        Ok(Vec::new())
    }

    fn handle_frame(
        &mut self,
        from: ParticipantId,
        frame: &Frame,
    ) -> Result<Vec<ServerAction>, ServerError> {
        if !self.registry.contains(from) {
            return Err(ServerError::UnknownParticipant(from));
        }

        let claimed = frame.header.sender();
        if claimed != from {
            return Err(ServerError::SenderMismatch { claimed, actual: from });
        }

        match Payload::from_frame(frame)? {
            Payload::RequestEquip(request) => {
                if !self.accept(from, request.request_id, Opcode::RequestEquip) {
                    return Ok(Vec::new());
                }
                self.handle_equip(from, request)
            },
            Payload::RequestUnequip(request) => {
                if !self.accept(from, request.request_id, Opcode::RequestUnequip) {
                    return Ok(Vec::new());
                }
                self.handle_unequip(from, request)
            },
            Payload::RequestResync(request) => {
                if !self.accept(from, request.request_id, Opcode::RequestResync) {
                    return Ok(Vec::new());
                }
                self.handle_resync(from, request)
            },
            Payload::ConfirmRelease(confirm) => Ok(self.handle_confirm(from, confirm)),
            other => Err(ServerError::UnexpectedFrame(other.opcode())),
        }
    }

    /// Advance the sender's watermark; `false` means a redelivered request.
    fn accept(&mut self, from: ParticipantId, request_id: u64, opcode: Opcode) -> bool {
        let fresh = self.registry.advance(from, request_id);
        if !fresh {
            tracing::debug!(
                participant = %from,
                request_id,
                ?opcode,
                watermark = self.registry.watermark(from).unwrap_or_default(),
                "duplicate request ignored"
            );
        }
        fresh
    }

    fn handle_equip(
        &mut self,
        from: ParticipantId,
        request: RequestEquip,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let RequestEquip { item, request_id } = request;

        if !self.ledger.contains(item) {
            return self.reject(item, from, request_id, RejectReason::UnknownItem);
        }

        let mut actions = Vec::new();

        match self.ledger.holder(item) {
            Some(holder) if holder == from => {
                tracing::debug!(item = %item, participant = %from, "re-granting to current holder");
            },
            Some(holder) => match self.config.conflict_policy {
                ConflictPolicy::FirstComeFirstServed => {
                    return self.reject(item, from, request_id, RejectReason::HeldByOther {
                        holder,
                    });
                },
                ConflictPolicy::LastWriteWins => {
                    actions.push(self.revoke(item, holder, ReleaseCause::Revoked { by: from })?);
                },
            },
            None => {},
        }

        let transition = self.ledger.set(item, AuthorityState::Owned(from));
        let announce = AnnounceEquip { item, holder: from, revision: transition.revision, request_id };
        actions.push(broadcast(Payload::AnnounceEquip(announce))?);
        actions.extend(self.handles.assign(item, from));

        tracing::info!(item = %item, participant = %from, revision = transition.revision, "authority granted");
        Ok(actions)
    }

    fn handle_unequip(
        &mut self,
        from: ParticipantId,
        request: RequestUnequip,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let RequestUnequip { item, request_id } = request;

        if !self.ledger.contains(item) {
            return self.reject(item, from, request_id, RejectReason::UnknownItem);
        }

        if !self.ledger.state(item).is_owned_by(from) {
            return self.reject(item, from, request_id, RejectReason::NotHolder);
        }

        let action = self.revoke(item, from, ReleaseCause::Requested { request_id })?;
        Ok(vec![action])
    }

    fn handle_confirm(&mut self, from: ParticipantId, confirm: ConfirmRelease) -> Vec<ServerAction> {
        self.handles.confirm(confirm.item, from, confirm.revision)
    }

    fn handle_resync(
        &mut self,
        from: ParticipantId,
        request: RequestResync,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let parts = self.snapshot().into_parts();
        tracing::info!(
            participant = %from,
            request_id = request.request_id,
            parts = parts.len(),
            "resync requested"
        );

        parts.into_iter().map(|part| broadcast(Payload::AnnounceSnapshot(part))).collect()
    }

    fn handle_left(&mut self, participant: ParticipantId) -> Result<Vec<ServerAction>, ServerError> {
        if !self.registry.contains(participant) {
            return Err(ServerError::UnknownParticipant(participant));
        }

        let held: Vec<ItemRef> = self.ledger.items_held_by(participant).collect();
        let mut actions = Vec::with_capacity(held.len());

        for item in held {
            let transition = self.ledger.set(item, AuthorityState::Unowned);
            let announce = AnnounceUnequip {
                item,
                holder: participant,
                revision: transition.revision,
                cause: ReleaseCause::Departed,
            };
            actions.push(broadcast(Payload::AnnounceUnequip(announce))?);
        }

        actions.extend(self.handles.holder_departed(participant));
        self.registry.leave(participant);

        tracing::info!(participant = %participant, "participant left");
        Ok(actions)
    }

    fn handle_tick(&mut self) -> Vec<ServerAction> {
        let now = self.env.now();
        self.handles.expire(now, self.config.release_timeout)
    }

    /// Clear `holder`'s ownership, announce it, and start reclaiming the
    /// handle.
    fn revoke(
        &mut self,
        item: ItemRef,
        holder: ParticipantId,
        cause: ReleaseCause,
    ) -> Result<ServerAction, ServerError> {
        let transition = self.ledger.set(item, AuthorityState::Unowned);
        let announce = AnnounceUnequip { item, holder, revision: transition.revision, cause };
        let action = broadcast(Payload::AnnounceUnequip(announce))?;

        self.handles.begin_reclaim(item, holder, transition.revision, self.env.now());

        tracing::info!(
            item = %item,
            participant = %holder,
            revision = transition.revision,
            ?cause,
            "authority released"
        );
        Ok(action)
    }

    fn reject(
        &self,
        item: ItemRef,
        requester: ParticipantId,
        request_id: u64,
        reason: RejectReason,
    ) -> Result<Vec<ServerAction>, ServerError> {
        tracing::warn!(item = %item, participant = %requester, request_id, ?reason, "request rejected");

        let announce = AnnounceRejected { item, requester, request_id, reason };
        Ok(vec![broadcast(Payload::AnnounceRejected(announce))?])
    }
}

fn broadcast(payload: Payload) -> Result<ServerAction, ServerError> {
    Ok(ServerAction::Broadcast(payload.into_frame(ParticipantId::SERVER)?))
}
