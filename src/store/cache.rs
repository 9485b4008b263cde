use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::logger::Logger;
use crate::store::backend::DataStore;
use crate::store::error::StoreResult;
use crate::store::model::{Bookmark, BookmarkId};
use crate::store::query::SelectQuery;
use crate::util::{ObserverList, PartialObserver, Unsubscribe};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/store"));

/// Local, newest-first copy of one owner's records.
///
/// The contents are only ever replaced wholesale: a successful
/// [`refresh`](RecordCache::refresh) swaps in the store's result set, and a
/// failed one leaves the previous snapshot untouched. Refreshes on the same
/// cache run one at a time, and [`clear`](RecordCache::clear) discards the
/// result of any refresh that was already in flight.
pub struct RecordCache {
    store: Arc<dyn DataStore>,
    collection: String,
    records: RwLock<Arc<Vec<Bookmark>>>,
    epoch: AtomicU64,
    refresh_lock: async_lock::Mutex<()>,
    last_refreshed: Mutex<Option<DateTime<Utc>>>,
    listeners: ObserverList<Vec<Bookmark>>,
}

impl RecordCache {
    pub fn new(store: Arc<dyn DataStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            records: RwLock::new(Arc::new(Vec::new())),
            epoch: AtomicU64::new(0),
            refresh_lock: async_lock::Mutex::new(()),
            last_refreshed: Mutex::new(None),
            listeners: ObserverList::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Replaces the contents with every record owned by `owner_id`.
    ///
    /// Returns the fetched records. When the cache was cleared while the
    /// fetch was in flight the result is returned but not committed.
    pub async fn refresh(&self, owner_id: &str) -> StoreResult<Vec<Bookmark>> {
        let _guard = self.refresh_lock.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let query = SelectQuery::owned_by(&self.collection, owner_id);

        let mut records = match self.store.select(&query).await {
            Ok(records) => records,
            Err(err) => {
                LOGGER.warn(format!(
                    "refresh of {} failed, keeping {} cached records: {err}",
                    self.collection,
                    self.len()
                ));
                return Err(err);
            }
        };
        query.sort(&mut records);

        if self.epoch.load(Ordering::SeqCst) != epoch {
            LOGGER.debug("cache cleared during refresh; discarding result");
            return Ok(records);
        }

        self.commit(records.clone());
        *self
            .last_refreshed
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
        LOGGER.debug(format!(
            "refreshed {} for {owner_id}: {} records",
            self.collection,
            records.len()
        ));
        Ok(records)
    }

    /// Inserts a record locally at its timestamp position, replacing any
    /// record with the same id.
    ///
    /// The sync loop never calls this; the next refresh overwrites local edits.
    pub fn add(&self, record: Bookmark) {
        let mut records = self.snapshot();
        records.retain(|existing| existing.id != record.id);
        let position = records
            .iter()
            .position(|existing| {
                (existing.created_at, &existing.id) < (record.created_at, &record.id)
            })
            .unwrap_or(records.len());
        records.insert(position, record);
        self.commit(records);
    }

    /// Removes a record locally. Returns whether anything was removed.
    pub fn remove_by_id(&self, id: &BookmarkId) -> bool {
        let mut records = self.snapshot();
        let before = records.len();
        records.retain(|existing| &existing.id != id);
        if records.len() == before {
            return false;
        }
        self.commit(records);
        true
    }

    /// Empties the cache and invalidates any refresh in flight.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self
            .last_refreshed
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = None;
        self.commit(Vec::new());
    }

    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.current().as_ref().clone()
    }

    pub fn get(&self, id: &BookmarkId) -> Option<Bookmark> {
        self.current().iter().find(|record| &record.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self
            .last_refreshed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    /// Observers receive the full snapshot after every committed change.
    pub fn on_change(&self, observer: PartialObserver<Vec<Bookmark>>) -> Unsubscribe {
        self.listeners.add(observer)
    }

    fn current(&self) -> Arc<Vec<Bookmark>> {
        self.records
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn commit(&self, records: Vec<Bookmark>) {
        let snapshot = records.clone();
        *self.records.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(records);
        self.listeners.notify(&snapshot);
    }
}
