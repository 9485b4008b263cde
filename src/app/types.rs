use std::time::Duration;

use crate::auth::DEFAULT_RESOLVE_TIMEOUT;
use crate::realtime::DEFAULT_SCHEMA;
use crate::util::BackoffConfig;

pub const DEFAULT_COLLECTION: &str = "bookmarks";
pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";
pub const DEFAULT_ENTRY_ROUTE: &str = "/";
pub const DEFAULT_DASHBOARD_ROUTE: &str = "/dashboard";
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 8;
pub const DEFAULT_RECONNECT_STABLE_AFTER: Duration = Duration::from_secs(30);

/// Connection options of the hosted backend project.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppOptions {
    pub project_url: Option<String>,
    pub anon_key: Option<String>,
}

impl AppOptions {
    pub fn new(project_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            project_url: Some(project_url.into()),
            anon_key: Some(anon_key.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub backoff: BackoffConfig,
    /// Attempts made after a drop before the controller stays degraded.
    pub max_attempts: u32,
    /// How long a reopened subscription must stay up before the attempt
    /// count starts over.
    pub stable_after: Duration,
}

impl ReconnectPolicy {
    /// Retries without delay; intended for tests and in-memory setups.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            backoff: BackoffConfig::immediate(),
            max_attempts,
            stable_after: DEFAULT_RECONNECT_STABLE_AFTER,
        }
    }

    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            stable_after: DEFAULT_RECONNECT_STABLE_AFTER,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    pub collection: String,
    pub schema: String,
    /// Origin the OAuth provider redirects back to.
    pub site_url: String,
    pub entry_route: String,
    pub dashboard_route: String,
    pub auth_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            entry_route: DEFAULT_ENTRY_ROUTE.to_string(),
            dashboard_route: DEFAULT_DASHBOARD_ROUTE.to_string(),
            auth_timeout: DEFAULT_RESOLVE_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AppSettings {
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_site_url(mut self, site_url: impl Into<String>) -> Self {
        self.site_url = site_url.into();
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Absolute URL of the dashboard, used as the OAuth redirect target.
    pub fn dashboard_url(&self) -> String {
        format!(
            "{}{}",
            self.site_url.trim_end_matches('/'),
            self.dashboard_route
        )
    }
}
