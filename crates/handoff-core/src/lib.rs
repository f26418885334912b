//! Shared building blocks for the handoff protocol.
//!
//! Everything here is pure state: the per-participant [`SlotRegistry`] and
//! [`LockGate`], the [`AuthorityLedger`] kept by the server and mirrored by
//! every machine, and the collaborator traits the client and server are
//! written against. No I/O happens in this crate.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod collaborators;
pub mod env;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod slot;

pub use collaborators::{BroadcastLink, Item, ItemDirectory, ParticipantHooks, ServerLink, SessionRegistry};
pub use env::Environment;
pub use error::{ErrorCategory, LinkError, LockError, SlotError};
pub use ledger::{AuthorityLedger, AuthorityState, LedgerEntry, Transition};
pub use lock::{Lock, LockGate};
pub use slot::{DeviceId, InputSlot, SlotRegistry};
