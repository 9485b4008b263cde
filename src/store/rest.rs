//! Record store client for a PostgREST-compatible API (`/rest/v1/<collection>`).

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use url::Url;

use crate::auth::{normalize_base_url, AccessTokenProvider, AuthError};
use crate::logger::Logger;
use crate::store::backend::DataStore;
use crate::store::error::{
    internal_error, invalid_argument, permission_denied, unavailable, StoreError, StoreResult,
};
use crate::store::model::{Bookmark, BookmarkId, NewBookmark, COLUMN_ID};
use crate::store::query::SelectQuery;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/store"));

pub struct RestDataStore {
    client: Client,
    base_url: Url,
    anon_key: String,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl RestDataStore {
    /// Requests are authorized as the signed-in user when `tokens` yields an
    /// access token, and with the anon key otherwise.
    pub fn new(
        project_url: &str,
        anon_key: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> StoreResult<Self> {
        let base_url = normalize_base_url(project_url)
            .map_err(|err| invalid_argument(format!("Invalid project URL: {err}")))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            anon_key: anon_key.into(),
            tokens,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn collection_url(&self, collection: &str) -> StoreResult<Url> {
        self.base_url
            .join(&format!("rest/v1/{collection}"))
            .map_err(|err| internal_error(format!("Failed to compose store URL: {err}")))
    }

    async fn request(&self, method: Method, url: Url) -> StoreResult<RequestBuilder> {
        let token = self.tokens.get_token().await.map_err(token_error)?;
        let bearer = token
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| self.anon_key.clone());
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer))
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = request.send().await.map_err(handle_reqwest_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.ok();
        Err(handle_http_error(status, body))
    }
}

#[async_trait]
impl DataStore for RestDataStore {
    async fn select(&self, query: &SelectQuery) -> StoreResult<Vec<Bookmark>> {
        let mut url = self.collection_url(&query.collection)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for filter in &query.filters {
                pairs.append_pair(&filter.column, &format!("eq.{}", filter.value));
            }
            if let Some(order) = &query.order_by {
                pairs.append_pair(
                    "order",
                    &format!("{}.{}", order.column, order.direction.as_str()),
                );
            }
        }

        let response = self.send(self.request(Method::GET, url).await?).await?;
        let mut records: Vec<Bookmark> = response
            .json()
            .await
            .map_err(|err| internal_error(format!("Failed to decode store response: {err}")))?;
        query.sort(&mut records);
        Ok(records)
    }

    async fn insert(&self, collection: &str, record: NewBookmark) -> StoreResult<Bookmark> {
        let url = self.collection_url(collection)?;
        let request = self
            .request(Method::POST, url)
            .await?
            .header("Prefer", "return=representation")
            .json(&[&record]);
        let response = self.send(request).await?;
        let mut inserted: Vec<Bookmark> = response
            .json()
            .await
            .map_err(|err| internal_error(format!("Failed to decode inserted record: {err}")))?;
        if inserted.is_empty() {
            return Err(internal_error("Store accepted the insert but returned no record"));
        }
        let stored = inserted.swap_remove(0);
        LOGGER.debug(format!("inserted {} into {collection}", stored.id));
        Ok(stored)
    }

    async fn delete(&self, collection: &str, id: &BookmarkId) -> StoreResult<()> {
        let mut url = self.collection_url(collection)?;
        url.query_pairs_mut()
            .append_pair(COLUMN_ID, &format!("eq.{id}"));
        self.send(self.request(Method::DELETE, url).await?).await?;
        Ok(())
    }
}

fn token_error(err: AuthError) -> StoreError {
    if err.is_unavailable() {
        unavailable(format!("Failed to obtain access token: {err}"))
    } else {
        permission_denied(format!("Failed to obtain access token: {err}"))
    }
}

fn handle_reqwest_error(err: reqwest::Error) -> StoreError {
    if let Some(status) = err.status() {
        return handle_http_error(status, None);
    }
    unavailable(format!("Store request failed: {err}"))
}

fn handle_http_error(status: StatusCode, body: Option<String>) -> StoreError {
    let message = body.as_deref().and_then(extract_error_message);
    let detail = message
        .map(|message| format!(": {message}"))
        .unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        permission_denied(format!("Store rejected credentials ({status}){detail}"))
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        unavailable(format!("Store request failed with status {status}{detail}"))
    } else {
        invalid_argument(format!("Store rejected request ({status}){detail}"))
    }
}

fn extract_error_message(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) {
        if let Some(Value::String(message)) = obj.get("message") {
            return Some(message.clone());
        }
    }
    Some(raw.to_string())
}
