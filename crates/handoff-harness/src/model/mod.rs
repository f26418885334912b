//! Reference model for model-based testing.
//!
//! [`ModelWorld`] is a sequential oracle: random [`Operation`] sequences are
//! applied to it and to the simulated cluster, and the results and
//! [`ObservableState`] must agree.

mod operation;
mod world;

pub use operation::{Operation, OperationError, OperationResult, WorldShape};
pub use world::{ModelWorld, ObservableState};
