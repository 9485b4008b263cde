use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Weak};
use std::time::Instant;

use futures::future::BoxFuture;

use crate::app::{BookmarkApp, Route};
use crate::auth::{AuthStateChange, Session};
use crate::logger::Logger;
use crate::platform::runtime::{sleep, spawn_detached};
use crate::realtime::{ChangeEvent, ChangeSubscription, ChannelTopic};
use crate::store::{Bookmark, BookmarkId, NewBookmark, RecordCache, StoreError};
use crate::sync::error::{not_ready, subscription_dropped, SyncError, SyncResult};
use crate::sync::refresh::RefreshScheduler;
use crate::sync::state::{SyncNotice, SyncState};
use crate::util::{backoff_delay, ObserverList, PartialObserver, Unsubscribe};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/sync"));

/// Everything bound to one signed-in session.
struct ActiveSync {
    generation: u64,
    owner_id: String,
    scheduler: RefreshScheduler,
    /// `None` while a dropped subscription is being reopened.
    subscription: Option<ChangeSubscription>,
    /// Reconnect attempts spent since the subscription last stayed up for
    /// `ReconnectPolicy::stable_after`.
    reconnect_streak: u32,
    restored_at: Option<Instant>,
    /// Set when the subscription being reopened reported a drop before it
    /// was installed.
    dropped_while_opening: bool,
}

struct ControllerInner {
    app: BookmarkApp,
    cache: Arc<RecordCache>,
    state: Mutex<SyncState>,
    active: Mutex<Option<ActiveSync>>,
    lifecycle: async_lock::Mutex<()>,
    /// Bumped whenever the active session is replaced or torn down; stale
    /// background work compares against it before touching shared state.
    generation: AtomicU64,
    degraded: AtomicBool,
    notices: ObserverList<SyncNotice>,
    auth_watch: Mutex<Option<Unsubscribe>>,
}

/// Keeps the [`RecordCache`] in step with the store for the signed-in user.
///
/// The controller resolves the session, loads the cache, and holds exactly
/// one [`ChangeSubscription`] while [`SyncState::Synced`]. Every change
/// event schedules a full refresh; mutations go to the store and reach the
/// cache only through that refresh.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<ControllerInner>,
}

impl SyncController {
    pub fn new(app: BookmarkApp) -> Self {
        let settings = app.settings();
        let cache = Arc::new(RecordCache::new(
            app.store().clone(),
            settings.collection.clone(),
        ));
        let inner = Arc::new(ControllerInner {
            app,
            cache,
            state: Mutex::new(SyncState::Unauthenticated),
            active: Mutex::new(None),
            lifecycle: async_lock::Mutex::new(()),
            generation: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            notices: ObserverList::new(),
            auth_watch: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let watch = inner.app.session_store().on_auth_state_changed(
            PartialObserver::new().with_next(move |change: &AuthStateChange| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_auth_change(change);
                }
            }),
        );
        *inner
            .auth_watch
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(watch);

        Self { inner }
    }

    pub fn app(&self) -> &BookmarkApp {
        &self.inner.app
    }

    /// Resolves the session and, when there is one, loads the cache and opens
    /// the change subscription.
    ///
    /// Returns [`Route::Entry`] when nobody is signed in. A failed refresh or
    /// subscription open leaves the controller in [`SyncState::Loading`];
    /// calling `start` again retries.
    pub async fn start(&self) -> SyncResult<Route> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if inner.state() == SyncState::Synced {
            return Ok(Route::Dashboard);
        }
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let session = match inner.app.session_store().resolve().await {
            Ok(session) => session,
            Err(err) => {
                LOGGER.warn(format!("session resolution failed: {err}"));
                inner.set_state(SyncState::Unauthenticated);
                return Err(err.into());
            }
        };
        let Some(session) = session else {
            inner.set_state(SyncState::Unauthenticated);
            return Ok(Route::Entry);
        };

        inner.set_state(SyncState::Loading);
        let owner_id = session.user_id().to_string();
        if let Err(err) = inner.cache.refresh(&owner_id).await {
            return Err(inner.store_failed(err));
        }

        let scheduler = inner.spawn_scheduler(owner_id.clone());
        let subscription =
            match ControllerInner::open_subscription(inner, &owner_id, &scheduler, generation).await
            {
                Ok(subscription) => subscription,
                Err(err) => {
                    scheduler.close();
                    LOGGER.warn(format!("change subscription failed to open: {err}"));
                    inner.notify(SyncNotice::SubscriptionDropped(err.clone()));
                    return Err(err);
                }
            };

        let rejected = {
            let mut active = inner.lock_active();
            if inner.generation.load(Ordering::SeqCst) == generation {
                *active = Some(ActiveSync {
                    generation,
                    owner_id: owner_id.clone(),
                    scheduler: scheduler.clone(),
                    subscription: Some(subscription),
                    reconnect_streak: 0,
                    restored_at: None,
                    dropped_while_opening: false,
                });
                None
            } else {
                Some(subscription)
            }
        };
        if let Some(subscription) = rejected {
            scheduler.close();
            close_subscription(subscription).await;
            inner.set_state(SyncState::Unauthenticated);
            return Err(not_ready("sync was torn down while starting"));
        }

        inner.degraded.store(false, Ordering::SeqCst);
        inner.set_state(SyncState::Synced);
        LOGGER.info(format!(
            "synced {} records for {owner_id}",
            inner.cache.len()
        ));
        Ok(Route::Dashboard)
    }

    /// Inserts a bookmark owned by the signed-in user.
    ///
    /// Empty titles or urls fail with `ValidationFailed` before anything else
    /// is checked. The cache is not touched; the resulting change event
    /// refreshes it.
    pub async fn request_add(&self, title: &str, url: &str) -> SyncResult<Bookmark> {
        NewBookmark::validate(title, url)?;
        let owner_id = self.inner.synced_owner()?;
        let record = NewBookmark::new(title, url, owner_id)?;
        let collection = &self.inner.app.settings().collection;
        match self.inner.app.store().insert(collection, record).await {
            Ok(stored) => {
                LOGGER.debug(format!("insert of {} accepted", stored.id));
                Ok(stored)
            }
            Err(err) => Err(self.inner.store_failed(err)),
        }
    }

    pub async fn request_delete(&self, id: &BookmarkId) -> SyncResult<()> {
        self.inner.synced_owner()?;
        let collection = &self.inner.app.settings().collection;
        match self.inner.app.store().delete(collection, id).await {
            Ok(()) => {
                LOGGER.debug(format!("delete of {id} accepted"));
                Ok(())
            }
            Err(err) => Err(self.inner.store_failed(err)),
        }
    }

    /// Refreshes the cache right away, e.g. after a `StoreFailed` notice.
    pub async fn refresh_now(&self) -> SyncResult<Vec<Bookmark>> {
        let owner_id = self.inner.synced_owner()?;
        self.inner
            .cache
            .refresh(&owner_id)
            .await
            .map_err(|err| self.inner.store_failed(err))
    }

    /// Waits until every refresh requested so far has run.
    pub async fn wait_until_settled(&self) {
        let scheduler = self
            .inner
            .lock_active()
            .as_ref()
            .map(|active| active.scheduler.clone());
        if let Some(scheduler) = scheduler {
            scheduler.wait_until_settled().await;
        }
    }

    /// Ends the session: closes the subscription, clears the cache, then
    /// signs out with the identity provider.
    ///
    /// Local state is always cleared. A failed remote sign-out is returned
    /// as `AuthUnavailable` and reported as [`SyncNotice::SignOutFailed`].
    pub async fn logout(&self) -> SyncResult<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        let active = inner.lock_active().take();
        if let Some(active) = active {
            inner.set_state(SyncState::Closing);
            active.scheduler.close();
            if let Some(subscription) = active.subscription {
                close_subscription(subscription).await;
            }
        }
        inner.cache.clear();
        inner.degraded.store(false, Ordering::SeqCst);

        let result = inner.app.session_store().logout().await;
        inner.set_state(SyncState::Unauthenticated);
        result.map_err(|err| {
            let err = SyncError::from(err);
            LOGGER.warn(format!("remote sign-out failed: {err}"));
            inner.notify(SyncNotice::SignOutFailed(err.clone()));
            err
        })
    }

    /// Navigation-away cleanup without signing out.
    ///
    /// Delivery stops before this returns; the channel handle is released in
    /// the background.
    pub fn teardown(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        let active = inner.lock_active().take();
        if let Some(active) = active {
            active.scheduler.close();
            drop(active.subscription);
        }
        inner.cache.clear();
        inner.degraded.store(false, Ordering::SeqCst);
        inner.set_state(SyncState::Unauthenticated);
    }

    pub fn state(&self) -> SyncState {
        self.inner.state()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.app.session_store().current()
    }

    /// Newest-first snapshot of the cache.
    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.inner.cache.snapshot()
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.inner.cache
    }

    /// True while the change subscription is down and the cache may be stale.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub fn on_notice(&self, observer: PartialObserver<SyncNotice>) -> Unsubscribe {
        self.inner.notices.add(observer)
    }

    pub fn on_bookmarks_changed(&self, observer: PartialObserver<Vec<Bookmark>>) -> Unsubscribe {
        self.inner.cache.on_change(observer)
    }
}

impl ControllerInner {
    fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: SyncState) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            LOGGER.info(format!("state {previous} -> {next}"));
            self.notify(SyncNotice::StateChanged(next));
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSync>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn notify(&self, notice: SyncNotice) {
        self.notices.notify(&notice);
    }

    fn synced_owner(&self) -> SyncResult<String> {
        let state = self.state();
        if state != SyncState::Synced {
            return Err(not_ready(format!("mutations are not accepted while {state}")));
        }
        self.lock_active()
            .as_ref()
            .map(|active| active.owner_id.clone())
            .ok_or_else(|| not_ready("no active session"))
    }

    fn store_failed(&self, err: StoreError) -> SyncError {
        let err = SyncError::from(err);
        LOGGER.warn(format!("store request failed: {err}"));
        self.notify(SyncNotice::StoreFailed(err.clone()));
        err
    }

    fn spawn_scheduler(self: &Arc<Self>, owner_id: String) -> RefreshScheduler {
        let weak = Arc::downgrade(self);
        RefreshScheduler::spawn(move || {
            let weak = weak.clone();
            let owner_id = owner_id.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = inner.cache.refresh(&owner_id).await {
                    inner.store_failed(err);
                }
            }
        })
    }

    async fn open_subscription(
        self: &Arc<Self>,
        owner_id: &str,
        scheduler: &RefreshScheduler,
        generation: u64,
    ) -> SyncResult<ChangeSubscription> {
        let settings = self.app.settings();
        let topic = ChannelTopic::owned_by(&settings.collection, owner_id)
            .with_schema(&settings.schema);

        let trigger = scheduler.clone();
        let weak = Arc::downgrade(self);
        let observer = PartialObserver::new()
            .with_next(move |event: &ChangeEvent| {
                LOGGER.debug(format!("{} on {}; scheduling refresh", event.kind, event.collection));
                trigger.request();
            })
            .with_error(move |err| {
                spawn_recovery(&weak, generation, subscription_dropped(err.to_string()));
            });

        Ok(ChangeSubscription::open(self.app.channel().clone(), topic, observer).await?)
    }

    /// Replaces a dropped subscription, backing off between attempts.
    ///
    /// Attempts are counted across drops until a reopened subscription stays
    /// up for `stable_after`, so a channel that accepts and then drops every
    /// join still exhausts the policy.
    async fn recover_subscription(self: Arc<Self>, generation: u64, error: SyncError) {
        let policy = self.app.settings().reconnect.clone();
        let taken = {
            let mut active = self.lock_active();
            match active.as_mut() {
                Some(active) if active.generation == generation => {
                    match active.subscription.take() {
                        Some(dropped) => {
                            let stable = active
                                .restored_at
                                .is_some_and(|at| at.elapsed() >= policy.stable_after);
                            if stable {
                                active.reconnect_streak = 0;
                            }
                            Some((
                                dropped,
                                active.scheduler.clone(),
                                active.owner_id.clone(),
                                active.reconnect_streak,
                            ))
                        }
                        None => {
                            active.dropped_while_opening = true;
                            None
                        }
                    }
                }
                _ => None,
            }
        };
        let Some((dropped, scheduler, owner_id, spent)) = taken else {
            return;
        };

        self.degraded.store(true, Ordering::SeqCst);
        LOGGER.warn(format!("change subscription dropped: {error}"));
        self.notify(SyncNotice::SubscriptionDropped(error));
        close_subscription(dropped).await;

        for attempt in spent..policy.max_attempts {
            sleep(backoff_delay(attempt, policy.backoff)).await;
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            self.with_active(generation, |active| active.dropped_while_opening = false);
            let subscription =
                match ControllerInner::open_subscription(&self, &owner_id, &scheduler, generation)
                    .await
                {
                    Ok(subscription) => subscription,
                    Err(err) => {
                        LOGGER.warn(format!("reconnect attempt {} failed: {err}", attempt + 1));
                        self.with_active(generation, |active| {
                            active.reconnect_streak = attempt + 1;
                        });
                        continue;
                    }
                };

            let outcome = {
                let mut active = self.lock_active();
                match active.as_mut() {
                    Some(active)
                        if active.generation == generation && active.subscription.is_none() =>
                    {
                        active.reconnect_streak = attempt + 1;
                        if std::mem::take(&mut active.dropped_while_opening) {
                            Reopened::Flapped(subscription)
                        } else {
                            active.subscription = Some(subscription);
                            active.restored_at = Some(Instant::now());
                            Reopened::Installed
                        }
                    }
                    _ => Reopened::Stale(subscription),
                }
            };
            match outcome {
                Reopened::Installed => {}
                Reopened::Flapped(subscription) => {
                    LOGGER.warn(format!(
                        "reconnect attempt {} dropped before it was installed",
                        attempt + 1
                    ));
                    close_subscription(subscription).await;
                    continue;
                }
                Reopened::Stale(subscription) => {
                    close_subscription(subscription).await;
                    return;
                }
            }

            scheduler.request();
            self.degraded.store(false, Ordering::SeqCst);
            LOGGER.info(format!("change subscription restored after {} attempt(s)", attempt + 1));
            self.notify(SyncNotice::SubscriptionRestored);
            return;
        }

        LOGGER.error(format!(
            "giving up on change subscription after {} attempts",
            policy.max_attempts
        ));
        self.notify(SyncNotice::ReconnectExhausted {
            attempts: policy.max_attempts,
        });
    }

    fn with_active(&self, generation: u64, update: impl FnOnce(&mut ActiveSync)) {
        if let Some(active) = self.lock_active().as_mut() {
            if active.generation == generation {
                update(active);
            }
        }
    }

    fn on_auth_change(self: &Arc<Self>, change: &AuthStateChange) {
        let active = self
            .lock_active()
            .as_ref()
            .map(|active| (active.generation, active.owner_id.clone()));
        let Some((generation, owner_id)) = active else {
            return;
        };
        match change {
            AuthStateChange::TokenRefreshed(_) => {
                LOGGER.debug("tokens refreshed; keeping the change subscription");
            }
            AuthStateChange::SignedIn(session) if session.user_id() == owner_id => {}
            AuthStateChange::SignedIn(_) | AuthStateChange::SignedOut => {
                let inner = self.clone();
                spawn_detached(async move {
                    inner.end_session(generation).await;
                });
            }
        }
    }

    /// Tears down sync for a session the identity provider ended on its own.
    async fn end_session(self: Arc<Self>, generation: u64) {
        let _lifecycle = self.lifecycle.lock().await;
        let active = {
            let mut active = self.lock_active();
            match active.as_ref() {
                Some(current) if current.generation == generation => active.take(),
                _ => None,
            }
        };
        let Some(active) = active else {
            return;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(SyncState::Closing);
        active.scheduler.close();
        if let Some(subscription) = active.subscription {
            close_subscription(subscription).await;
        }
        self.cache.clear();
        self.degraded.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Unauthenticated);
        LOGGER.info("session ended by identity provider");
        self.notify(SyncNotice::SessionEnded);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        let watch = self
            .auth_watch
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(unsubscribe) = watch {
            unsubscribe();
        }
        let active = self.active.get_mut().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(active) = active {
            active.scheduler.close();
        }
    }
}

enum Reopened {
    Installed,
    /// Dropped again before it could be installed.
    Flapped(ChangeSubscription),
    /// The session moved on while reopening.
    Stale(ChangeSubscription),
}

fn spawn_recovery(inner: &Weak<ControllerInner>, generation: u64, error: SyncError) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let task: BoxFuture<'static, ()> = Box::pin(inner.recover_subscription(generation, error));
    spawn_detached(task);
}

async fn close_subscription(subscription: ChangeSubscription) {
    if let Err(err) = subscription.close().await {
        LOGGER.warn(format!("failed to close change subscription: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::app::ReconnectPolicy;
    use crate::auth::InMemoryAuthService;
    use crate::realtime::{
        ChannelHandle, RealtimeChannel, RealtimeError, RealtimeErrorCode, RealtimeResult,
    };
    use crate::store::{DataStore, InMemoryDataStore};
    use crate::sync::error::SyncErrorCode;
    use crate::test_support::{signed_in_test_app, test_settings, wait_until, NoticeRecorder};

    /// Accepts every join and drops it straight away.
    #[derive(Default)]
    struct FlappingChannel {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeChannel for FlappingChannel {
        async fn subscribe(
            &self,
            _topic: &ChannelTopic,
            observer: PartialObserver<ChangeEvent>,
        ) -> RealtimeResult<ChannelHandle> {
            let id = self.opened.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            observer.notify_error(&RealtimeError::new(
                RealtimeErrorCode::ChannelClosed,
                "joined, then dropped",
            ));
            Ok(ChannelHandle::new(id))
        }

        async fn unsubscribe(&self, _handle: ChannelHandle) -> RealtimeResult<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn signed_in_app() -> BookmarkApp {
        let app = BookmarkApp::in_memory();
        app.in_memory_auth()
            .unwrap()
            .complete_sign_in("user-1", "reader@example.com");
        app
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_without_session_routes_to_entry() {
        let controller = SyncController::new(BookmarkApp::in_memory());
        assert_eq!(controller.start().await.unwrap(), Route::Entry);
        assert_eq!(controller.state(), SyncState::Unauthenticated);
        assert_eq!(controller.app().in_memory_channel().unwrap().open_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_is_idempotent_once_synced() {
        let app = signed_in_app();
        let controller = SyncController::new(app.clone());
        assert_eq!(controller.start().await.unwrap(), Route::Dashboard);
        assert_eq!(controller.start().await.unwrap(), Route::Dashboard);
        assert_eq!(app.in_memory_channel().unwrap().open_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn mutations_before_start_are_not_ready() {
        let app = signed_in_app();
        let controller = SyncController::new(app.clone());
        let err = controller
            .request_add("Paper", "https://example.com/paper")
            .await
            .unwrap_err();
        assert_eq!(err.code, SyncErrorCode::NotReady);
        assert_eq!(app.in_memory_store().unwrap().calls().total(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_initial_refresh_stays_loading_and_retries() {
        let app = signed_in_app();
        let store = app.in_memory_store().unwrap();
        store.set_reachable(false);
        let controller = SyncController::new(app.clone());
        let notices = NoticeRecorder::attach(&controller);

        let err = controller.start().await.unwrap_err();
        assert_eq!(err.code, SyncErrorCode::StoreUnavailable);
        assert_eq!(controller.state(), SyncState::Loading);
        assert!(notices
            .all()
            .iter()
            .any(|notice| matches!(notice, SyncNotice::StoreFailed(_))));

        store.set_reachable(true);
        assert_eq!(controller.start().await.unwrap(), Route::Dashboard);
        assert_eq!(controller.state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_identity_provider_is_auth_unavailable() {
        let app = signed_in_app();
        app.in_memory_auth().unwrap().set_reachable(false);
        let controller = SyncController::new(app);
        let err = controller.start().await.unwrap_err();
        assert_eq!(err.code, SyncErrorCode::AuthUnavailable);
        assert_eq!(controller.state(), SyncState::Unauthenticated);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn state_changes_are_announced_in_order() {
        let controller = SyncController::new(signed_in_app());
        let notices = NoticeRecorder::attach(&controller);
        controller.start().await.unwrap();
        controller.logout().await.unwrap();

        assert_eq!(
            notices.states(),
            vec![
                SyncState::Loading,
                SyncState::Synced,
                SyncState::Closing,
                SyncState::Unauthenticated,
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn external_sign_out_ends_sync() {
        let app = signed_in_app();
        let controller = SyncController::new(app.clone());
        let notices = NoticeRecorder::attach(&controller);
        controller.start().await.unwrap();

        app.session_store().logout().await.unwrap();
        wait_until(|| controller.state() == SyncState::Unauthenticated).await;

        let channel = app.in_memory_channel().unwrap();
        wait_until(|| channel.close_count() == 1).await;
        assert!(controller.bookmarks().is_empty());
        assert!(notices.all().contains(&SyncNotice::SessionEnded));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn token_refresh_keeps_subscription() {
        let app = signed_in_app();
        let controller = SyncController::new(app.clone());
        controller.start().await.unwrap();

        let refreshed = app
            .in_memory_auth()
            .unwrap()
            .complete_sign_in("user-1", "reader@example.com");
        app.session_store().replace_session(refreshed);
        sleep(Duration::from_millis(5)).await;

        let channel = app.in_memory_channel().unwrap();
        assert_eq!(controller.state(), SyncState::Synced);
        assert_eq!(channel.open_count(), 1);
        assert_eq!(channel.close_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropped_subscription_is_reopened_with_catch_up_refresh() {
        let app = signed_in_test_app("user-1");
        let controller = SyncController::new(app.clone());
        let notices = NoticeRecorder::attach(&controller);
        controller.start().await.unwrap();
        let channel = app.in_memory_channel().unwrap();
        let store = app.in_memory_store().unwrap();

        channel.disconnect();
        let missed = NewBookmark::new("missed", "https://example.com/missed", "user-1").unwrap();
        store.insert("bookmarks", missed).await.unwrap();

        wait_until(|| notices.contains(&SyncNotice::SubscriptionRestored)).await;
        controller.wait_until_settled().await;

        assert!(!controller.is_degraded());
        assert_eq!(controller.bookmarks().len(), 1);
        assert_eq!(controller.bookmarks()[0].title, "missed");
        assert_eq!(channel.open_count(), 2);
        assert_eq!(channel.close_count(), 1);
        assert_eq!(channel.active_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn exhausted_reconnect_leaves_controller_degraded() {
        let app = signed_in_test_app("user-1");
        let controller = SyncController::new(app.clone());
        let notices = NoticeRecorder::attach(&controller);
        controller.start().await.unwrap();
        let channel = app.in_memory_channel().unwrap();

        channel.set_available(false);
        channel.disconnect();
        wait_until(|| notices.contains(&SyncNotice::ReconnectExhausted { attempts: 3 })).await;

        assert!(controller.is_degraded());
        assert_eq!(controller.state(), SyncState::Synced);
        assert!(notices
            .all()
            .iter()
            .any(|notice| matches!(notice, SyncNotice::SubscriptionDropped(_))));

        controller.logout().await.unwrap();
        assert!(!controller.is_degraded());
        assert_eq!(channel.open_count(), 1);
        assert_eq!(channel.close_count(), 1);
        assert_eq!(channel.duplicate_close_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn channel_that_drops_every_join_exhausts_reconnects() {
        let auth = Arc::new(InMemoryAuthService::new());
        auth.complete_sign_in("user-1", "reader@example.com");
        let channel = Arc::new(FlappingChannel::default());
        let app = BookmarkApp::builder()
            .settings(test_settings())
            .auth(auth)
            .store(Arc::new(InMemoryDataStore::new()))
            .channel(channel.clone())
            .build()
            .unwrap();
        let controller = SyncController::new(app);
        let notices = NoticeRecorder::attach(&controller);

        controller.start().await.unwrap();
        wait_until(|| notices.contains(&SyncNotice::ReconnectExhausted { attempts: 3 })).await;
        wait_until(|| channel.closed.load(Ordering::SeqCst) == 4).await;
        sleep(Duration::from_millis(20)).await;

        assert!(controller.is_degraded());
        assert_eq!(channel.opened.load(Ordering::SeqCst), 4);
        assert_eq!(channel.closed.load(Ordering::SeqCst), 4);

        controller.logout().await.unwrap();
        assert_eq!(channel.closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stable_subscription_restores_the_attempt_budget() {
        let settings = test_settings()
            .with_reconnect(ReconnectPolicy::immediate(1).with_stable_after(Duration::ZERO));
        let app = BookmarkApp::in_memory_with_settings(settings);
        app.in_memory_auth()
            .unwrap()
            .complete_sign_in("user-1", "reader@example.com");
        let controller = SyncController::new(app.clone());
        let notices = NoticeRecorder::attach(&controller);
        let channel = app.in_memory_channel().unwrap();
        let restored = || {
            notices
                .all()
                .iter()
                .filter(|notice| **notice == SyncNotice::SubscriptionRestored)
                .count()
        };
        controller.start().await.unwrap();

        channel.disconnect();
        wait_until(|| restored() == 1).await;
        channel.disconnect();
        wait_until(|| restored() == 2).await;

        assert!(!controller.is_degraded());
        assert_eq!(channel.active_count(), 1);
        assert_eq!(channel.open_count(), 3);
    }
}
