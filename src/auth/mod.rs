//! # Authentication
//!
//! Session resolution and the identity-provider seam.
//!
//! [`SessionStore`] owns the current [`Session`] and is the only component that
//! talks to the [`AuthService`]. Two providers ship with the crate: the
//! in-memory [`InMemoryAuthService`] used in tests and demos, and
//! [`RestAuthService`] for a GoTrue-compatible `/auth/v1` API with the OAuth
//! redirect flow.
mod error;
mod model;
mod rest;
mod service;
mod session_store;

#[doc(inline)]
pub use error::{AuthError, AuthResult};

#[doc(inline)]
pub use model::{AuthStateChange, AuthUser, Session, SignInRequest, GOOGLE_PROVIDER_ID};

#[doc(inline)]
pub use rest::{RecordingRedirectHandler, RedirectHandler, RestAuthService};

pub(crate) use rest::normalize_base_url;

#[doc(inline)]
pub use service::{AccessTokenProvider, AuthService, InMemoryAuthService, NoopTokenProvider};

#[doc(inline)]
pub use session_store::{SessionStore, DEFAULT_RESOLVE_TIMEOUT};
