use std::sync::LazyLock;

use crate::app::types::AppSettings;
use crate::auth::{AuthResult, SessionStore, GOOGLE_PROVIDER_ID};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/app"));

/// Where the host application should send the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Unauthenticated entry point with the sign-in action.
    Entry,
    Dashboard,
}

impl Route {
    pub fn path<'a>(&self, settings: &'a AppSettings) -> &'a str {
        match self {
            Route::Entry => &settings.entry_route,
            Route::Dashboard => &settings.dashboard_route,
        }
    }
}

/// Entry-view check: signed-in users go straight to the dashboard.
///
/// An unreachable identity provider keeps the user on the entry view.
pub async fn landing_route(sessions: &SessionStore) -> Route {
    match sessions.resolve().await {
        Ok(Some(_)) => Route::Dashboard,
        Ok(None) => Route::Entry,
        Err(err) => {
            LOGGER.warn(format!("session check failed, staying on entry view: {err}"));
            Route::Entry
        }
    }
}

/// Starts the Google OAuth redirect back to the dashboard.
pub async fn sign_in_with_google(sessions: &SessionStore, settings: &AppSettings) -> AuthResult<()> {
    sessions
        .sign_in_with_provider(GOOGLE_PROVIDER_ID, &settings.dashboard_url())
        .await
}
