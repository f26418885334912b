//! Client
//!
//! Per-machine side of the handoff protocol. A [`Controller`] holds this
//! machine's replica of every participant in the session, its mirror of the
//! server's authority ledger, and the injected [`ServerLink`] used for
//! directed calls.
//!
//! # Architecture
//!
//! Local intents (equip, unequip, lock changes) are validated and bound
//! optimistically, then sent to the server. Server broadcasts come back through
//! [`Controller::handle_frame`] and are applied as ledger transitions: the
//! previous holder's replica runs the release path, the new holder's replica
//! runs the grant path. On the machine that controls the holder, the
//! [`LocalAuthorityFinalizer`] performs the actual handoff.
//!
//! # Components
//!
//! - [`Controller`]: Replicas, mirror and protocol driver for one machine
//! - [`Participant`]: One replica with slots, locks and pending requests
//! - [`LocalAuthorityFinalizer`]: Exists only on locally controlled replicas
//! - [`ControllerConfig`]: Recovery behaviour knobs

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod controller;
mod error;
mod finalizer;
mod participant;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::ControllerError;
pub use finalizer::LocalAuthorityFinalizer;
pub use handoff_core::{
    DeviceId, ErrorCategory, Item, ItemDirectory, Lock, ParticipantHooks, ServerLink,
    SessionRegistry,
};
pub use participant::{Intent, ItemPhase, Participant, PendingRequest};
