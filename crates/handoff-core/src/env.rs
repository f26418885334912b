//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from the system clock. The server reads time only
//! through this trait, so release timeouts run on a virtual clock in
//! simulation and on `std::time::Instant` in production.

use std::time::Duration;

/// Abstract environment providing time.
///
/// # Invariants
///
/// - `now()` never goes backwards
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual instant driven by the test.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - This method MUST return values that never decrease within a single
    ///   execution context. Subsequent calls must return times >= previous
    ///   calls.
    fn now(&self) -> Self::Instant;
}
