use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::realtime::{ChangeEvent, ChangeKind, InMemoryChannel};
use crate::store::backend::DataStore;
use crate::store::error::{unavailable, StoreResult};
use crate::store::model::{Bookmark, BookmarkId, NewBookmark};
use crate::store::query::SelectQuery;

/// Per-operation call counts, including calls rejected while unreachable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub select: usize,
    pub insert: usize,
    pub delete: usize,
}

impl StoreCallCounts {
    pub fn total(&self) -> usize {
        self.select + self.insert + self.delete
    }
}

#[derive(Default)]
struct Counters {
    select: AtomicUsize,
    insert: AtomicUsize,
    delete: AtomicUsize,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Vec<Bookmark>>,
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl MemoryState {
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    fn next_id(&mut self) -> BookmarkId {
        self.next_id += 1;
        BookmarkId::new(self.next_id.to_string())
    }
}

/// Process-local [`DataStore`].
///
/// Ids are sequential, timestamps strictly increase across inserts, and
/// every accepted insert or delete is published to the attached
/// [`InMemoryChannel`] once the write is visible to `select`.
pub struct InMemoryDataStore {
    state: Mutex<MemoryState>,
    reachable: AtomicBool,
    counters: Counters,
    channel: Mutex<Option<Arc<InMemoryChannel>>>,
}

impl Default for InMemoryDataStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            reachable: AtomicBool::new(true),
            counters: Counters::default(),
            channel: Mutex::new(None),
        }
    }
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(channel: Arc<InMemoryChannel>) -> Self {
        let store = Self::default();
        store.attach_channel(channel);
        store
    }

    pub fn attach_channel(&self, channel: Arc<InMemoryChannel>) {
        *self.channel.lock().unwrap_or_else(|p| p.into_inner()) = Some(channel);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> StoreCallCounts {
        StoreCallCounts {
            select: self.counters.select.load(Ordering::SeqCst),
            insert: self.counters.insert.load(Ordering::SeqCst),
            delete: self.counters.delete.load(Ordering::SeqCst),
        }
    }

    /// Stores a record with a caller-chosen timestamp, bypassing reachability.
    ///
    /// Publishes an insert event like a regular insert.
    pub fn insert_at(
        &self,
        collection: &str,
        record: NewBookmark,
        created_at: DateTime<Utc>,
    ) -> Bookmark {
        let stored = {
            let mut state = self.lock_state();
            let id = state.next_id();
            let stored = record.into_bookmark(id, created_at);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(stored.clone());
            stored
        };
        self.publish(ChangeEvent::for_record(ChangeKind::Insert, collection, &stored));
        stored
    }

    /// Current contents of a collection, in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Bookmark> {
        self.lock_state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn ensure_reachable(&self) -> StoreResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(unavailable("In-memory store is offline"))
        }
    }

    fn publish(&self, event: ChangeEvent) {
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(channel) = channel {
            channel.publish(event);
        }
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn select(&self, query: &SelectQuery) -> StoreResult<Vec<Bookmark>> {
        self.counters.select.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        let mut records: Vec<Bookmark> = self
            .lock_state()
            .collections
            .get(&query.collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| query.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut records);
        Ok(records)
    }

    async fn insert(&self, collection: &str, record: NewBookmark) -> StoreResult<Bookmark> {
        self.counters.insert.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        let stored = {
            let mut state = self.lock_state();
            let id = state.next_id();
            let created_at = state.next_timestamp();
            let stored = record.into_bookmark(id, created_at);
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(stored.clone());
            stored
        };
        self.publish(ChangeEvent::for_record(ChangeKind::Insert, collection, &stored));
        Ok(stored)
    }

    async fn delete(&self, collection: &str, id: &BookmarkId) -> StoreResult<()> {
        self.counters.delete.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;
        let removed = {
            let mut state = self.lock_state();
            state.collections.get_mut(collection).and_then(|records| {
                let index = records.iter().position(|record| &record.id == id)?;
                Some(records.remove(index))
            })
        };
        if let Some(removed) = removed {
            self.publish(ChangeEvent::for_record(ChangeKind::Delete, collection, &removed));
        }
        Ok(())
    }
}
