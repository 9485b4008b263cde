use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::realtime::channel::{ChannelHandle, RealtimeChannel};
use crate::realtime::error::{channel_closed, unavailable, RealtimeResult};
use crate::realtime::event::{ChangeEvent, ChannelTopic};
use crate::util::PartialObserver;

/// Number of recently published events kept for inspection.
pub const PUBLISHED_HISTORY: usize = 64;

struct Registration {
    topic: ChannelTopic,
    observer: PartialObserver<ChangeEvent>,
}

#[derive(Default)]
struct ChannelState {
    next_id: u64,
    active: HashMap<u64, Registration>,
    /// Handles dropped by `disconnect` that have not been released yet.
    detached: HashSet<u64>,
    published: VecDeque<ChangeEvent>,
    published_count: usize,
    opened: usize,
    closed: usize,
    duplicate_closes: usize,
}

/// Process-local [`RealtimeChannel`] that keeps lifecycle counters for tests.
pub struct InMemoryChannel {
    state: Mutex<ChannelState>,
    available: AtomicBool,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, `subscribe` fails and already-open handles stay open.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delivers `event` to every open subscription whose topic matches.
    pub fn publish(&self, event: ChangeEvent) {
        let observers: Vec<PartialObserver<ChangeEvent>> = {
            let mut state = self.lock_state();
            if state.published.len() == PUBLISHED_HISTORY {
                state.published.pop_front();
            }
            state.published.push_back(event.clone());
            state.published_count += 1;
            state
                .active
                .values()
                .filter(|registration| registration.topic.matches(&event))
                .map(|registration| registration.observer.clone())
                .collect()
        };
        for observer in observers {
            observer.notify_next(&event);
        }
    }

    /// Simulates the service dropping every open subscription.
    pub fn disconnect(&self) {
        let dropped: Vec<PartialObserver<ChangeEvent>> = {
            let mut state = self.lock_state();
            let drained: Vec<(u64, Registration)> = state.active.drain().collect();
            drained
                .into_iter()
                .map(|(id, registration)| {
                    state.detached.insert(id);
                    registration.observer
                })
                .collect()
        };
        let error = channel_closed("in-memory channel disconnected");
        for observer in dropped {
            observer.notify_error(&error);
        }
    }

    /// The most recent events, oldest first, at most [`PUBLISHED_HISTORY`].
    pub fn published(&self) -> Vec<ChangeEvent> {
        self.lock_state().published.iter().cloned().collect()
    }

    /// Events published since creation, including ones rotated out of
    /// [`published`](Self::published).
    pub fn published_count(&self) -> usize {
        self.lock_state().published_count
    }

    pub fn active_count(&self) -> usize {
        self.lock_state().active.len()
    }

    pub fn open_count(&self) -> usize {
        self.lock_state().opened
    }

    pub fn close_count(&self) -> usize {
        self.lock_state().closed
    }

    /// Unsubscribe calls for handles that were already released.
    pub fn duplicate_close_count(&self) -> usize {
        self.lock_state().duplicate_closes
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryChannel {
    async fn subscribe(
        &self,
        topic: &ChannelTopic,
        observer: PartialObserver<ChangeEvent>,
    ) -> RealtimeResult<ChannelHandle> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(unavailable("in-memory channel is unavailable"));
        }
        let mut state = self.lock_state();
        state.next_id += 1;
        let id = state.next_id;
        state.active.insert(
            id,
            Registration {
                topic: topic.clone(),
                observer,
            },
        );
        state.opened += 1;
        Ok(ChannelHandle::new(id))
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> RealtimeResult<()> {
        let mut state = self.lock_state();
        let id = handle.id();
        let released = state.active.remove(&id).is_some() || state.detached.remove(&id);
        if released {
            state.closed += 1;
        } else {
            state.duplicate_closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::event::ChangeKind;
    use std::sync::Arc;

    fn recording_observer() -> (PartialObserver<ChangeEvent>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let next_log = log.clone();
        let error_log = log.clone();
        let observer = PartialObserver::new()
            .with_next(move |event: &ChangeEvent| {
                next_log.lock().unwrap().push(event.kind.to_string());
            })
            .with_error(move |error| {
                error_log.lock().unwrap().push(format!("error: {error}"));
            });
        (observer, log)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn delivers_matching_events_until_unsubscribed() {
        let channel = InMemoryChannel::new();
        let (observer, log) = recording_observer();
        let handle = channel
            .subscribe(&ChannelTopic::owned_by("bookmarks", "user-1"), observer)
            .await
            .unwrap();

        channel.publish(ChangeEvent::new(ChangeKind::Insert, "bookmarks").with_owner("user-1"));
        channel.publish(ChangeEvent::new(ChangeKind::Insert, "bookmarks").with_owner("user-2"));
        channel.unsubscribe(handle).await.unwrap();
        channel.publish(ChangeEvent::new(ChangeKind::Delete, "bookmarks").with_owner("user-1"));

        assert_eq!(*log.lock().unwrap(), vec!["INSERT".to_string()]);
        assert_eq!(channel.open_count(), 1);
        assert_eq!(channel.close_count(), 1);
        assert_eq!(channel.active_count(), 0);
        assert_eq!(channel.published().len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn disconnect_reports_error_and_handle_still_closes_once() {
        let channel = InMemoryChannel::new();
        let (observer, log) = recording_observer();
        let handle = channel
            .subscribe(&ChannelTopic::new("bookmarks"), observer)
            .await
            .unwrap();

        channel.disconnect();
        assert_eq!(channel.active_count(), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(log.lock().unwrap()[0].starts_with("error:"));

        channel.unsubscribe(handle).await.unwrap();
        channel.unsubscribe(handle).await.unwrap();
        assert_eq!(channel.close_count(), 1);
        assert_eq!(channel.duplicate_close_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unavailable_channel_rejects_subscribe() {
        let channel = InMemoryChannel::new();
        channel.set_available(false);
        let err = channel
            .subscribe(&ChannelTopic::new("bookmarks"), PartialObserver::new())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "realtime/unavailable");
        assert_eq!(channel.open_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bookkeeping_stays_bounded() {
        let channel = InMemoryChannel::new();
        for round in 0..10 {
            let handle = channel
                .subscribe(&ChannelTopic::new("bookmarks"), PartialObserver::new())
                .await
                .unwrap();
            if round % 2 == 0 {
                channel.disconnect();
            }
            channel.unsubscribe(handle).await.unwrap();
        }
        for n in 0..(PUBLISHED_HISTORY + 36) {
            channel.publish(ChangeEvent::new(ChangeKind::Insert, format!("c{n}")));
        }

        let published = channel.published();
        assert_eq!(published.len(), PUBLISHED_HISTORY);
        assert_eq!(published[0].collection, "c36");
        assert_eq!(channel.published_count(), PUBLISHED_HISTORY + 36);
        assert_eq!(channel.close_count(), 10);
        assert_eq!(channel.duplicate_close_count(), 0);
        assert!(channel.lock_state().detached.is_empty());
    }
}
