//! Production Environment implementation using system time.
//!
//! Real time advances on its own, so release timeouts in production are
//! measured against the wall clock. Deterministic tests use the virtual clock
//! from the harness instead.

use handoff_core::Environment;

/// Production environment backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }
}
