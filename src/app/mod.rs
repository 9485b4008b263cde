//! # Application context
//!
//! [`BookmarkApp`] bundles the identity provider, record store and realtime
//! channel with the [`AppSettings`] they run under, and is handed to the
//! [`SyncController`](crate::sync::SyncController) explicitly.
mod api;
mod errors;
mod routes;
mod types;

#[doc(inline)]
pub use api::{BookmarkApp, BookmarkAppBuilder, InMemoryBackends};

#[doc(inline)]
pub use errors::{AppError, AppResult};

#[doc(inline)]
pub use routes::{landing_route, sign_in_with_google, Route};

#[doc(inline)]
pub use types::{
    AppOptions, AppSettings, ReconnectPolicy, DEFAULT_COLLECTION, DEFAULT_DASHBOARD_ROUTE,
    DEFAULT_ENTRY_ROUTE, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_STABLE_AFTER,
    DEFAULT_SITE_URL,
};
