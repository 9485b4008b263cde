use std::fmt;

use crate::sync::error::SyncError;

/// Lifecycle of a [`SyncController`](crate::sync::SyncController).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    #[default]
    Unauthenticated,
    /// Session resolved; cache and subscription are being set up.
    Loading,
    Synced,
    /// Logout in progress.
    Closing,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unauthenticated => "unauthenticated",
            SyncState::Loading => "loading",
            SyncState::Synced => "synced",
            SyncState::Closing => "closing",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-band signals for the host UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncNotice {
    StateChanged(SyncState),
    /// A refresh or mutation failed; the cache kept its last-known contents.
    StoreFailed(SyncError),
    SubscriptionDropped(SyncError),
    SubscriptionRestored,
    /// Reconnect gave up; the cache stays stale until the next start.
    ReconnectExhausted { attempts: u32 },
    /// The identity provider ended the session outside of `logout`.
    SessionEnded,
    SignOutFailed(SyncError),
}
