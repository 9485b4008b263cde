use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AuthStateChange, Session};
use crate::auth::service::AuthService;
use crate::logger::Logger;
use crate::util::{ObserverList, PartialObserver, Unsubscribe};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/auth"));

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Holds the current authenticated identity.
///
/// The store is resolved once per page entry; it does not poll for expiry on
/// its own. Transitions it observes are published to auth state observers.
pub struct SessionStore {
    auth: Arc<dyn AuthService>,
    current: Mutex<Option<Session>>,
    listeners: ObserverList<AuthStateChange>,
    resolve_timeout: Duration,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        Self {
            auth,
            current: Mutex::new(None),
            listeners: ObserverList::new(),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Asks the identity provider for an existing session.
    ///
    /// Fails with [`AuthError::Unavailable`] when the provider does not answer
    /// within the resolve timeout. A failed lookup leaves local state untouched.
    pub async fn resolve(&self) -> AuthResult<Option<Session>> {
        let resolved = match tokio::time::timeout(self.resolve_timeout, self.auth.get_session())
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(AuthError::Unavailable(format!(
                    "session lookup did not complete within {:?}",
                    self.resolve_timeout
                )))
            }
        };
        self.apply(resolved.clone());
        Ok(resolved)
    }

    pub fn current(&self) -> Option<Session> {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    /// Installs a session obtained out of band (redirect completion, token refresh).
    pub fn replace_session(&self, session: Session) {
        self.apply(Some(session));
    }

    pub async fn sign_in_with_provider(&self, provider_id: &str, redirect_to: &str) -> AuthResult<()> {
        LOGGER.info(format!("starting {provider_id} sign-in, redirecting to {redirect_to}"));
        self.auth.sign_in_with_provider(provider_id, redirect_to).await
    }

    /// Signs out with the provider and clears the local session.
    ///
    /// Calling this without a session is a no-op. Local state is cleared even
    /// when the provider rejects or cannot be reached; that failure is returned.
    pub async fn logout(&self) -> AuthResult<()> {
        if !self.is_signed_in() {
            return Ok(());
        }
        let remote = self.auth.sign_out().await;
        if let Err(err) = &remote {
            LOGGER.warn(format!("remote sign-out failed, clearing local session: {err}"));
        }
        self.apply(None);
        remote
    }

    pub fn on_auth_state_changed(
        &self,
        observer: PartialObserver<AuthStateChange>,
    ) -> Unsubscribe {
        self.listeners.add(observer)
    }

    fn apply(&self, next: Option<Session>) {
        let change = {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            let change = match (current.as_ref(), next.as_ref()) {
                (None, None) => None,
                (Some(_), None) => Some(AuthStateChange::SignedOut),
                (None, Some(session)) => Some(AuthStateChange::SignedIn(session.clone())),
                (Some(previous), Some(session)) if previous == session => None,
                (Some(previous), Some(session)) if previous.user_id() == session.user_id() => {
                    Some(AuthStateChange::TokenRefreshed(session.clone()))
                }
                (Some(_), Some(session)) => Some(AuthStateChange::SignedIn(session.clone())),
            };
            *current = next;
            change
        };

        if let Some(change) = change {
            match &change {
                AuthStateChange::SignedIn(session) => {
                    LOGGER.info(format!("signed in as {}", session.user_id()))
                }
                AuthStateChange::TokenRefreshed(session) => {
                    LOGGER.debug(format!("tokens refreshed for {}", session.user_id()))
                }
                AuthStateChange::SignedOut => LOGGER.info("signed out"),
            }
            self.listeners.notify(&change);
        }
    }
}
