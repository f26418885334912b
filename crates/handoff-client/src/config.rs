//! Controller configuration.

/// Recovery behaviour of a [`crate::Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Ask the server for a snapshot when an announcement names an item this
    /// machine cannot resolve. Sent once per unresolved item.
    pub resync_on_missing_item: bool,

    /// Hand back grants for items a local participant no longer binds and has
    /// no pending request for.
    pub release_orphaned_grants: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { resync_on_missing_item: true, release_orphaned_grants: true }
    }
}
