//! Identifiers that cross the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a participant in the session.
///
/// `0` is reserved for the server as the sender of broadcast frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// Sender id used by the server.
    pub const SERVER: Self = Self(0);

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id is the reserved server id.
    #[must_use]
    pub const fn is_server(self) -> bool {
        self.0 == Self::SERVER.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Network-transmitted reference to a shared item.
///
/// Resolving the reference to a live object is the receiver's job; the
/// protocol only compares references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRef(pub u64);

impl ItemRef {
    /// Raw reference value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}
