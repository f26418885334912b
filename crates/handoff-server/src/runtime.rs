//! Runtime glue between the driver and a broadcast transport.

use handoff_core::{BroadcastLink, Environment};

use crate::{
    ServerConfig,
    driver::{ServerAction, ServerDriver, ServerEvent},
    error::ServerError,
};

/// A [`ServerDriver`] wired to a [`BroadcastLink`].
///
/// Broadcasts are executed immediately and in order. Handle changes are
/// returned to the caller, which owns the transport-level ownership model.
pub struct Server<E: Environment, B: BroadcastLink> {
    driver: ServerDriver<E>,
    link: B,
}

impl<E: Environment, B: BroadcastLink> Server<E, B> {
    /// Create a server over `link`.
    pub fn new(env: E, config: ServerConfig, link: B) -> Self {
        Self { driver: ServerDriver::new(env, config), link }
    }

    /// The wrapped driver.
    pub fn driver(&self) -> &ServerDriver<E> {
        &self.driver
    }

    /// Mutable access to the wrapped driver.
    pub fn driver_mut(&mut self) -> &mut ServerDriver<E> {
        &mut self.driver
    }

    /// The broadcast transport.
    pub fn link(&self) -> &B {
        &self.link
    }

    /// Mutable access to the broadcast transport.
    pub fn link_mut(&mut self) -> &mut B {
        &mut self.link
    }

    /// Process `event`, broadcast what it produced, and return the handle
    /// actions.
    ///
    /// # Errors
    ///
    /// Returns the driver's error, or `ServerError::Transport` on the first
    /// broadcast the link refuses. Broadcasts after a refused one are not
    /// attempted.
    pub fn process(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        let actions = self.driver.process_event(event)?;
        let mut handle_actions = Vec::new();

        for action in actions {
            match action {
                ServerAction::Broadcast(frame) => {
                    if let Err(e) = self.link.broadcast(frame) {
                        tracing::error!(error = %e, "broadcast failed");
                        return Err(e.into());
                    }
                },
                other => handle_actions.push(other),
            }
        }

        Ok(handle_actions)
    }
}
