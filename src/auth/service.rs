use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AuthUser, Session, SignInRequest};

/// Identity provider consulted by the session store.
#[async_trait]
pub trait AuthService: Send + Sync + 'static {
    /// Returns the session the provider currently holds for this client, if any.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    /// Starts the provider's redirect flow; completion happens out of band.
    async fn sign_in_with_provider(&self, provider_id: &str, redirect_to: &str)
        -> AuthResult<()>;

    async fn sign_out(&self) -> AuthResult<()>;
}

/// Supplies the bearer token used by the data store and the realtime channel.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync + 'static {
    async fn get_token(&self) -> AuthResult<Option<String>>;
}

/// Token provider for anonymous access; requests only carry the project key.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTokenProvider;

#[async_trait]
impl AccessTokenProvider for NoopTokenProvider {
    async fn get_token(&self) -> AuthResult<Option<String>> {
        Ok(None)
    }
}

/// Identity provider held entirely in memory.
///
/// Sign-in redirects are recorded; `complete_sign_in` plays the part of the
/// provider calling back with a fresh session.
#[derive(Debug)]
pub struct InMemoryAuthService {
    session: Mutex<Option<Session>>,
    reachable: AtomicBool,
    sign_in_requests: Mutex<Vec<SignInRequest>>,
    sign_out_calls: AtomicUsize,
    issued_tokens: AtomicUsize,
}

impl Default for InMemoryAuthService {
    fn default() -> Self {
        Self {
            session: Mutex::new(None),
            reachable: AtomicBool::new(true),
            sign_in_requests: Mutex::new(Vec::new()),
            sign_out_calls: AtomicUsize::new(0),
            issued_tokens: AtomicUsize::new(0),
        }
    }
}

impl InMemoryAuthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a session for the given user, as the provider would after a
    /// successful redirect.
    pub fn complete_sign_in(&self, user_id: &str, email: &str) -> Session {
        let serial = self.issued_tokens.fetch_add(1, Ordering::SeqCst);
        let session = Session::new(
            format!("access-{user_id}-{serial}"),
            AuthUser {
                id: user_id.to_owned(),
                email: Some(email.to_owned()),
            },
        )
        .with_refresh_token(format!("refresh-{user_id}-{serial}"));
        self.set_session(Some(session.clone()));
        session
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(|p| p.into_inner()) = session;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn sign_in_requests(&self) -> Vec<SignInRequest> {
        self.sign_in_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> AuthResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthError::Unavailable(
                "in-memory identity provider is offline".into(),
            ))
        }
    }
}

#[async_trait]
impl AuthService for InMemoryAuthService {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        self.ensure_reachable()?;
        let mut guard = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if guard.as_ref().is_some_and(Session::is_expired) {
            guard.take();
        }
        Ok(guard.clone())
    }

    async fn sign_in_with_provider(
        &self,
        provider_id: &str,
        redirect_to: &str,
    ) -> AuthResult<()> {
        self.ensure_reachable()?;
        self.sign_in_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SignInRequest {
                provider_id: provider_id.to_owned(),
                redirect_to: redirect_to.to_owned(),
            });
        Ok(())
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.ensure_reachable()?;
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.set_session(None);
        Ok(())
    }
}

#[async_trait]
impl AccessTokenProvider for InMemoryAuthService {
    async fn get_token(&self) -> AuthResult<Option<String>> {
        Ok(self
            .session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|session| session.access_token.clone()))
    }
}
