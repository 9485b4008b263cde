//! # Sync
//!
//! The session-gated loop that keeps a user's bookmarks current:
//! [`SyncController`] drives the [`SyncState`] machine, coalesces change
//! events into refreshes through [`RefreshScheduler`], and reports problems
//! as [`SyncError`]s and [`SyncNotice`]s.
mod controller;
mod error;
mod refresh;
mod state;

#[doc(inline)]
pub use controller::SyncController;

#[doc(inline)]
pub use error::{SyncError, SyncErrorCode, SyncResult};

#[doc(inline)]
pub use refresh::RefreshScheduler;

#[doc(inline)]
pub use state::{SyncNotice, SyncState};
