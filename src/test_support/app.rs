use crate::app::{AppSettings, BookmarkApp, ReconnectPolicy};

/// Settings with immediate reconnects so drop recovery runs without delays.
pub fn test_settings() -> AppSettings {
    AppSettings::default().with_reconnect(ReconnectPolicy::immediate(3))
}

/// In-memory app with `user_id` already signed in.
pub fn signed_in_test_app(user_id: &str) -> BookmarkApp {
    let app = BookmarkApp::in_memory_with_settings(test_settings());
    if let Some(auth) = app.in_memory_auth() {
        auth.complete_sign_in(user_id, &format!("{user_id}@example.com"));
    }
    app
}
