//! Handoff server.
//!
//! The server owns the authoritative item ledger. It arbitrates equip and
//! unequip requests, broadcasts every change, and tracks the transport-level
//! authority handles it assigns to and reclaims from holders.
//!
//! # Architecture
//!
//! [`ServerDriver`] is Sans-IO: the runtime feeds it [`ServerEvent`]s and
//! executes the [`ServerAction`]s it returns. [`Server`] is the thin runtime
//! glue that pushes broadcasts through a [`BroadcastLink`] and hands the
//! authority handle changes back to the host.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based arbiter (pure logic, no I/O)
//! - [`Server`]: Executes broadcasts through a [`BroadcastLink`]
//! - [`ParticipantRegistry`]: Joined participants and their request watermarks
//! - [`AuthorityHandles`]: Assign/reclaim tracking with confirmation-driven
//!   release
//! - [`SystemEnv`]: Production environment (real time)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod handles;
mod registry;
mod runtime;
mod system_env;

pub use driver::{ConflictPolicy, ServerAction, ServerConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use handles::{AuthorityHandles, Handle, ReclaimReason};
pub use handoff_core::{BroadcastLink, Environment};
pub use registry::ParticipantRegistry;
pub use runtime::Server;
pub use system_env::SystemEnv;
