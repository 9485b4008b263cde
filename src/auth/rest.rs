//! Identity provider client for a GoTrue-compatible auth API (`/auth/v1`).

use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::model::{AuthUser, Session};
use crate::auth::service::{AccessTokenProvider, AuthService};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/auth/rest"));

/// Opens the provider's authorization page (browser, webview, test recorder).
pub trait RedirectHandler: Send + Sync + 'static {
    fn open(&self, url: &Url) -> AuthResult<()>;
}

/// Redirect handler that only remembers the URLs it was asked to open.
#[derive(Debug, Default)]
pub struct RecordingRedirectHandler {
    opened: Mutex<Vec<Url>>,
}

impl RecordingRedirectHandler {
    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl RedirectHandler for RecordingRedirectHandler {
    fn open(&self, url: &Url) -> AuthResult<()> {
        self.opened
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(url.clone());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let mut session = Session::new(self.access_token, self.user);
        session.refresh_token = self.refresh_token;
        session.expires_at = self
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));
        session
    }
}

pub struct RestAuthService {
    client: Client,
    project_url: Url,
    anon_key: String,
    session: Mutex<Option<Session>>,
    redirect_handler: Arc<dyn RedirectHandler>,
}

impl RestAuthService {
    pub fn new(project_url: &str, anon_key: impl Into<String>) -> AuthResult<Self> {
        Ok(Self {
            client: Client::new(),
            project_url: normalize_base_url(project_url)?,
            anon_key: anon_key.into(),
            session: Mutex::new(None),
            redirect_handler: Arc::new(RecordingRedirectHandler::default()),
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_redirect_handler(mut self, handler: Arc<dyn RedirectHandler>) -> Self {
        self.redirect_handler = handler;
        self
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(|p| p.into_inner()) = session;
    }

    fn held_session(&self) -> Option<Session> {
        self.session.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Builds the provider authorization URL for the redirect flow.
    pub fn authorize_url(&self, provider_id: &str, redirect_to: &str) -> AuthResult<Url> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider_id)
            .append_pair("redirect_to", redirect_to);
        Ok(url)
    }

    /// Completes the redirect flow from the URL the provider sent the user back to.
    ///
    /// Tokens arrive in the fragment (`#access_token=...&refresh_token=...`);
    /// the user profile is then loaded with the new access token.
    pub async fn complete_redirect(&self, callback_url: &str) -> AuthResult<Session> {
        let callback = Url::parse(callback_url)?;
        let fragment = callback.fragment().unwrap_or_default();
        let mut access_token = None;
        let mut refresh_token = None;
        let mut expires_in = None;
        let mut error_description = None;
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            match key.as_ref() {
                "access_token" => access_token = Some(value.into_owned()),
                "refresh_token" => refresh_token = Some(value.into_owned()),
                "expires_in" => expires_in = value.parse::<i64>().ok(),
                "error_description" | "error" => {
                    error_description.get_or_insert_with(|| value.into_owned());
                }
                _ => {}
            }
        }

        if let Some(description) = error_description {
            return Err(AuthError::InvalidCredential(description));
        }
        let access_token = access_token.ok_or_else(|| {
            AuthError::InvalidResponse("redirect callback carries no access_token".into())
        })?;

        let user = self.fetch_user(&access_token).await?;
        let mut session = Session::new(access_token, user);
        session.refresh_token = refresh_token;
        session.expires_at = expires_in.map(|seconds| Utc::now() + Duration::seconds(seconds));
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn fetch_user(&self, access_token: &str) -> AuthResult<AuthUser> {
        let response = self
            .client
            .get(self.endpoint("auth/v1/user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(map_status(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|err| AuthError::InvalidResponse(format!("user payload: {err}")))
    }

    async fn refresh_session(&self, refresh_token: &str) -> AuthResult<Option<Session>> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let response = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_client_error() {
            LOGGER.warn(format!("refresh token rejected ({status}); dropping session"));
            self.set_session(None);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(map_status(status, &body));
        }
        let refreshed: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| AuthError::InvalidResponse(format!("token payload: {err}")))?;
        let session = refreshed.into_session();
        self.set_session(Some(session.clone()));
        Ok(Some(session))
    }

    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        Ok(self.project_url.join(path)?)
    }
}

#[async_trait]
impl AuthService for RestAuthService {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let Some(session) = self.held_session() else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }
        match session.refresh_token.as_deref() {
            Some(refresh_token) => self.refresh_session(refresh_token).await,
            None => {
                self.set_session(None);
                Ok(None)
            }
        }
    }

    async fn sign_in_with_provider(
        &self,
        provider_id: &str,
        redirect_to: &str,
    ) -> AuthResult<()> {
        let url = self.authorize_url(provider_id, redirect_to)?;
        self.redirect_handler.open(&url)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let Some(session) = self.held_session() else {
            return Ok(());
        };
        self.set_session(None);
        let response = self
            .client
            .post(self.endpoint("auth/v1/logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        let status = response.status();
        // An already-revoked token means the session is gone remotely as well.
        if status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND
        {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(map_status(status, &body))
        }
    }
}

#[async_trait]
impl AccessTokenProvider for RestAuthService {
    async fn get_token(&self) -> AuthResult<Option<String>> {
        Ok(self
            .get_session()
            .await?
            .map(|session| session.access_token))
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> AuthResult<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn map_status(status: StatusCode, body: &str) -> AuthError {
    let message = format!("{status}: {body}");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        AuthError::InvalidCredential(message)
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        AuthError::Unavailable(message)
    } else {
        AuthError::InvalidResponse(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn service(server: &MockServer) -> RestAuthService {
        RestAuthService::new(&server.base_url(), "anon-key").expect("service")
    }

    fn user_json() -> serde_json::Value {
        json!({ "id": "user-1", "email": "reader@example.com", "aud": "authenticated" })
    }

    #[test]
    fn authorize_url_carries_provider_and_redirect() {
        let service = RestAuthService::new("https://project.example.co", "anon").unwrap();
        let url = service
            .authorize_url("google", "http://localhost:3000/dashboard")
            .unwrap();

        assert_eq!(url.path(), "/auth/v1/authorize");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("provider".to_string(), "google".to_string()),
                (
                    "redirect_to".to_string(),
                    "http://localhost:3000/dashboard".to_string()
                ),
            ]
        );
    }

    #[test]
    fn base_url_keeps_nested_path() {
        let url = normalize_base_url("http://localhost:54321/project").unwrap();
        assert_eq!(url.join("auth/v1/user").unwrap().path(), "/project/auth/v1/user");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_in_hands_url_to_redirect_handler() {
        let handler = Arc::new(RecordingRedirectHandler::default());
        let service = RestAuthService::new("https://project.example.co", "anon")
            .unwrap()
            .with_redirect_handler(handler.clone());

        service
            .sign_in_with_provider("google", "http://localhost:3000/dashboard")
            .await
            .unwrap();

        let opened = handler.opened();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].as_str().contains("provider=google"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn complete_redirect_loads_user_and_stores_session() {
        let server = MockServer::start_async().await;
        let user_mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/auth/v1/user")
                    .header("apikey", "anon-key")
                    .header("authorization", "Bearer access-1");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(user_json());
            })
            .await;
        let service = service(&server);

        let session = service
            .complete_redirect(
                "http://localhost:3000/dashboard#access_token=access-1&refresh_token=refresh-1&expires_in=3600&token_type=bearer",
            )
            .await
            .unwrap();

        user_mock.assert_async().await;
        assert_eq!(session.user_id(), "user-1");
        assert_eq!(session.email(), Some("reader@example.com"));
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!session.is_expired());
        assert_eq!(service.get_session().await.unwrap(), Some(session));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn complete_redirect_surfaces_provider_error() {
        let service = RestAuthService::new("https://project.example.co", "anon").unwrap();
        let err = service
            .complete_redirect("http://localhost:3000/#error=access_denied&error_description=User+cancelled")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredential("access_denied".into()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn expired_session_is_refreshed() {
        let server = MockServer::start_async().await;
        let refresh_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/v1/token")
                    .query_param("grant_type", "refresh_token")
                    .json_body(json!({ "refresh_token": "refresh-1" }));
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "access_token": "access-2",
                        "token_type": "bearer",
                        "expires_in": 3600,
                        "refresh_token": "refresh-2",
                        "user": user_json(),
                    }));
            })
            .await;
        let service = service(&server);
        service.set_session(Some(
            Session::new(
                "access-1",
                AuthUser {
                    id: "user-1".into(),
                    email: None,
                },
            )
            .with_refresh_token("refresh-1")
            .with_expires_at(Utc::now() - Duration::seconds(5)),
        ));

        let session = service.get_session().await.unwrap().expect("refreshed");

        refresh_mock.assert_async().await;
        assert_eq!(session.access_token, "access-2");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));
        assert_eq!(service.get_token().await.unwrap().as_deref(), Some("access-2"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejected_refresh_clears_session() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/v1/token");
                then.status(400)
                    .header("content-type", "application/json")
                    .json_body(json!({ "error": "invalid_grant" }));
            })
            .await;
        let service = service(&server);
        service.set_session(Some(
            Session::new(
                "access-1",
                AuthUser {
                    id: "user-1".into(),
                    email: None,
                },
            )
            .with_refresh_token("stale")
            .with_expires_at(Utc::now() - Duration::seconds(5)),
        ));

        assert_eq!(service.get_session().await.unwrap(), None);
        assert_eq!(service.get_session().await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_out_revokes_and_clears() {
        let server = MockServer::start_async().await;
        let logout_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/v1/logout")
                    .header("authorization", "Bearer access-1");
                then.status(204);
            })
            .await;
        let service = service(&server);
        service.set_session(Some(Session::new(
            "access-1",
            AuthUser {
                id: "user-1".into(),
                email: None,
            },
        )));

        service.sign_out().await.unwrap();
        service.sign_out().await.unwrap();

        logout_mock.assert_hits_async(1).await;
        assert_eq!(service.get_session().await.unwrap(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn server_errors_map_to_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/auth/v1/user");
                then.status(503).body("maintenance");
            })
            .await;
        let service = service(&server);

        let err = service
            .complete_redirect("http://localhost:3000/#access_token=a")
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
