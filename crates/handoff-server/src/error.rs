//! Server error types.
//!
//! None of these are fatal to the session: the offending frame or event is
//! dropped and the runtime carries on.

use handoff_core::LinkError;
use handoff_proto::{Opcode, ParticipantId, ProtocolError};
use thiserror::Error;

/// Errors that can occur while processing a server event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Frame or departure from a participant that never joined
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Participant joined twice
    #[error("participant {0} already joined")]
    AlreadyJoined(ParticipantId),

    /// Join refused because the session is full
    #[error("participant limit of {max} reached")]
    TooManyParticipants {
        /// Configured limit
        max: usize,
    },

    /// Frame header names a different sender than the connection it came on
    #[error("frame from {actual} claims to be from {claimed}")]
    SenderMismatch {
        /// Sender written in the header
        claimed: ParticipantId,
        /// Participant the runtime received it from
        actual: ParticipantId,
    },

    /// A participant sent a frame only the server may send
    #[error("unexpected {0:?} frame from a participant")]
    UnexpectedFrame(Opcode),

    /// Frame could not be decoded or encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Broadcast could not be handed to the transport
    #[error(transparent)]
    Transport(#[from] LinkError),
}

impl ServerError {
    /// Returns true if the error was caused by the peer rather than the host.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            Self::UnknownParticipant(_)
                | Self::SenderMismatch { .. }
                | Self::UnexpectedFrame(_)
                | Self::Protocol(_)
        )
    }
}
