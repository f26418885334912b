//! Deterministic simulation harness for the handoff protocol.
//!
//! A virtual clock, a seeded in-memory network with fault injection, and
//! recording item and participant collaborators. [`Cluster`] wires one server
//! and one machine per participant together over that network.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a sequential reference implementation.
//! Operations are applied to both the model and the cluster, and their
//! results and observable states are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Use [`InvariantRegistry::standard()`] for the protocol's safety and
//! convergence properties.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod model;
pub mod sim_env;
pub mod sim_item;
pub mod sim_network;

pub use cluster::{Cluster, ClusterConfig, Machine, SimController};
pub use invariants::{
    BindingMatchesLedger, DeviceUniqueness, FinalizerControl, Invariant, InvariantRegistry,
    InvariantResult, MachineSnapshot, MirrorConvergence, PostConvergenceExclusivity,
    SystemSnapshot, Violation,
};
pub use model::{
    ModelWorld, ObservableState, Operation, OperationError, OperationResult, WorldShape,
};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_item::{HookEvent, ItemCall, RecordingHooks, SimItem, SimItemDirectory};
pub use sim_network::{Envelope, FaultConfig, NetworkStats, Outbox, Route, SimNetwork};
