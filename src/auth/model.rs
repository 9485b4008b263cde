use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider id used by the sign-in button of the entry view.
pub const GOOGLE_PROVIDER_ID: &str = "google";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Authenticated identity valid for the current interaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user: AuthUser) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            user,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Identifier that owns the user's bookmark rows.
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Transition observed by the session store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthStateChange {
    SignedIn(Session),
    /// Same user, new tokens.
    TokenRefreshed(Session),
    SignedOut,
}

/// A sign-in redirect that was handed to the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignInRequest {
    pub provider_id: String,
    pub redirect_to: String,
}
