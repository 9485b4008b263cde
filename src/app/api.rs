use std::sync::{Arc, LazyLock};

use crate::app::errors::{AppError, AppResult};
use crate::app::types::{AppOptions, AppSettings};
use crate::auth::{AccessTokenProvider, AuthService, InMemoryAuthService, RestAuthService, SessionStore};
use crate::logger::Logger;
use crate::realtime::{InMemoryChannel, RealtimeChannel, WebSocketChannel};
use crate::store::{DataStore, InMemoryDataStore, RestDataStore};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/app"));

/// Concrete handles to the backends wired by [`BookmarkApp::in_memory`].
#[derive(Clone)]
pub struct InMemoryBackends {
    pub auth: Arc<InMemoryAuthService>,
    pub store: Arc<InMemoryDataStore>,
    pub channel: Arc<InMemoryChannel>,
}

struct AppInner {
    settings: AppSettings,
    sessions: Arc<SessionStore>,
    store: Arc<dyn DataStore>,
    channel: Arc<dyn RealtimeChannel>,
    in_memory: Option<InMemoryBackends>,
    rest_auth: Option<Arc<RestAuthService>>,
}

/// Explicit application context: the three collaborators plus settings.
///
/// Cheap to clone; every clone shares the same [`SessionStore`].
#[derive(Clone)]
pub struct BookmarkApp {
    inner: Arc<AppInner>,
}

impl BookmarkApp {
    pub fn builder() -> BookmarkAppBuilder {
        BookmarkAppBuilder::default()
    }

    /// In-memory backends; the store publishes its writes to the channel.
    pub fn in_memory() -> Self {
        Self::in_memory_with_settings(AppSettings::default())
    }

    pub fn in_memory_with_settings(settings: AppSettings) -> Self {
        let backends = InMemoryBackends {
            auth: Arc::new(InMemoryAuthService::new()),
            store: Arc::new(InMemoryDataStore::new()),
            channel: Arc::new(InMemoryChannel::new()),
        };
        backends.store.attach_channel(backends.channel.clone());
        Self::assemble(
            settings,
            backends.auth.clone(),
            backends.store.clone(),
            backends.channel.clone(),
            Some(backends),
            None,
        )
    }

    /// HTTP auth and store plus the websocket channel of a hosted project.
    pub fn connect(options: AppOptions, settings: AppSettings) -> AppResult<Self> {
        let project_url = options
            .project_url
            .filter(|value| !value.is_empty())
            .ok_or(AppError::MissingOption {
                name: "project_url",
            })?;
        let anon_key = options
            .anon_key
            .filter(|value| !value.is_empty())
            .ok_or(AppError::MissingOption { name: "anon_key" })?;

        let auth = Arc::new(RestAuthService::new(&project_url, anon_key.clone()).map_err(
            |err| AppError::InvalidOption {
                name: "project_url",
                message: err.to_string(),
            },
        )?);
        let tokens: Arc<dyn AccessTokenProvider> = auth.clone();
        let store = RestDataStore::new(&project_url, anon_key.clone(), tokens.clone()).map_err(
            |err| AppError::InvalidOption {
                name: "project_url",
                message: err.to_string(),
            },
        )?;
        let channel = WebSocketChannel::new(&project_url, anon_key, tokens).map_err(|err| {
            AppError::InvalidOption {
                name: "project_url",
                message: err.to_string(),
            }
        })?;

        LOGGER.debug(format!("connected app to {project_url}"));
        Ok(Self::assemble(
            settings,
            auth.clone(),
            Arc::new(store),
            Arc::new(channel),
            None,
            Some(auth),
        ))
    }

    fn assemble(
        settings: AppSettings,
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DataStore>,
        channel: Arc<dyn RealtimeChannel>,
        in_memory: Option<InMemoryBackends>,
        rest_auth: Option<Arc<RestAuthService>>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(auth).with_resolve_timeout(settings.auth_timeout));
        Self {
            inner: Arc::new(AppInner {
                settings,
                sessions,
                store,
                channel,
                in_memory,
                rest_auth,
            }),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.inner.settings
    }

    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    pub fn channel(&self) -> &Arc<dyn RealtimeChannel> {
        &self.inner.channel
    }

    pub fn in_memory_backends(&self) -> Option<&InMemoryBackends> {
        self.inner.in_memory.as_ref()
    }

    pub fn in_memory_auth(&self) -> Option<Arc<InMemoryAuthService>> {
        self.inner.in_memory.as_ref().map(|backends| backends.auth.clone())
    }

    pub fn in_memory_store(&self) -> Option<Arc<InMemoryDataStore>> {
        self.inner.in_memory.as_ref().map(|backends| backends.store.clone())
    }

    pub fn in_memory_channel(&self) -> Option<Arc<InMemoryChannel>> {
        self.inner
            .in_memory
            .as_ref()
            .map(|backends| backends.channel.clone())
    }

    /// The HTTP auth client of a [`connect`](Self::connect)ed app, for
    /// completing the OAuth redirect.
    pub fn rest_auth(&self) -> Option<Arc<RestAuthService>> {
        self.inner.rest_auth.clone()
    }
}

#[derive(Default)]
pub struct BookmarkAppBuilder {
    settings: AppSettings,
    auth: Option<Arc<dyn AuthService>>,
    store: Option<Arc<dyn DataStore>>,
    channel: Option<Arc<dyn RealtimeChannel>>,
}

impl BookmarkAppBuilder {
    pub fn settings(mut self, settings: AppSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn RealtimeChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn build(self) -> AppResult<BookmarkApp> {
        let auth = self.auth.ok_or(AppError::MissingCollaborator {
            name: "authentication service",
        })?;
        let store = self.store.ok_or(AppError::MissingCollaborator { name: "data store" })?;
        let channel = self.channel.ok_or(AppError::MissingCollaborator {
            name: "realtime channel",
        })?;
        Ok(BookmarkApp::assemble(
            self.settings,
            auth,
            store,
            channel,
            None,
            None,
        ))
    }
}
