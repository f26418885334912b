//! Operation codes identifying the payload carried by a frame.

/// Frame operation code.
///
/// Requests (participant to server) occupy `0x01..=0x0F`, announcements
/// (server to everyone) occupy `0x10..=0x1F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Ask the server for authority over an item.
    RequestEquip = 0x01,
    /// Ask the server to release authority over an item.
    RequestUnequip = 0x02,
    /// Holder finished its local release hooks.
    ConfirmRelease = 0x03,
    /// Ask the server to broadcast the full ledger.
    RequestResync = 0x04,

    /// Item is now held by a participant.
    AnnounceEquip = 0x10,
    /// Item is no longer held.
    AnnounceUnequip = 0x11,
    /// A request was refused.
    AnnounceRejected = 0x12,
    /// Full ledger state.
    AnnounceSnapshot = 0x13,
}

impl Opcode {
    /// Parse a raw opcode byte. `None` if unrecognized.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::RequestEquip),
            0x02 => Some(Self::RequestUnequip),
            0x03 => Some(Self::ConfirmRelease),
            0x04 => Some(Self::RequestResync),
            0x10 => Some(Self::AnnounceEquip),
            0x11 => Some(Self::AnnounceUnequip),
            0x12 => Some(Self::AnnounceRejected),
            0x13 => Some(Self::AnnounceSnapshot),
            _ => None,
        }
    }

    /// Raw opcode byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether the opcode travels from a participant to the server.
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            Self::RequestEquip | Self::RequestUnequip | Self::ConfirmRelease | Self::RequestResync
        )
    }
}
