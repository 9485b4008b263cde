use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use crate::logger::Logger;
use crate::platform::runtime::spawn_detached;
use crate::realtime::channel::{ChannelHandle, RealtimeChannel};
use crate::realtime::error::RealtimeResult;
use crate::realtime::event::{ChangeEvent, ChannelTopic};
use crate::util::PartialObserver;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@bookmarks/realtime"));

/// An open registration for change events on one topic.
///
/// Callbacks pass through a delivery gate that closes the moment the
/// subscription is closed or dropped, so nothing is delivered after that
/// point even if the channel is slow to release the handle. The channel
/// handle is released exactly once: by [`close`](Self::close), or in the
/// background when the subscription is dropped unclosed.
pub struct ChangeSubscription {
    channel: Arc<dyn RealtimeChannel>,
    topic: ChannelTopic,
    handle: Option<ChannelHandle>,
    gate: Arc<AtomicBool>,
}

impl ChangeSubscription {
    /// Registers `observer` for `topic`.
    ///
    /// `observer.next` runs on the channel's delivery path and must not block.
    pub async fn open(
        channel: Arc<dyn RealtimeChannel>,
        topic: ChannelTopic,
        observer: PartialObserver<ChangeEvent>,
    ) -> RealtimeResult<Self> {
        let gate = Arc::new(AtomicBool::new(true));
        let gated = gate_observer(observer, gate.clone());
        let handle = channel.subscribe(&topic, gated).await?;
        LOGGER.debug(format!("opened {handle} for {}", topic.name()));
        Ok(Self {
            channel,
            topic,
            handle: Some(handle),
            gate,
        })
    }

    pub fn topic(&self) -> &ChannelTopic {
        &self.topic
    }

    pub fn handle(&self) -> Option<ChannelHandle> {
        self.handle
    }

    /// Whether events are still delivered.
    pub fn is_open(&self) -> bool {
        self.gate.load(Ordering::SeqCst)
    }

    /// Stops delivery and waits for the channel to release the handle.
    pub async fn close(mut self) -> RealtimeResult<()> {
        self.gate.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        LOGGER.debug(format!("closing {handle} for {}", self.topic.name()));
        self.channel.unsubscribe(handle).await
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.gate.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        LOGGER.debug(format!("releasing {handle} for {} in background", self.topic.name()));
        let channel = self.channel.clone();
        spawn_detached(async move {
            if let Err(err) = channel.unsubscribe(handle).await {
                LOGGER.warn(format!("failed to release {handle}: {err}"));
            }
        });
    }
}

fn gate_observer(
    observer: PartialObserver<ChangeEvent>,
    gate: Arc<AtomicBool>,
) -> PartialObserver<ChangeEvent> {
    let mut gated = PartialObserver::new();
    if let Some(next) = observer.next {
        let gate = gate.clone();
        gated = gated.with_next(move |event: &ChangeEvent| {
            if gate.load(Ordering::SeqCst) {
                next(event);
            }
        });
    }
    if let Some(error) = observer.error {
        let gate = gate.clone();
        gated = gated.with_error(move |err| {
            if gate.load(Ordering::SeqCst) {
                error(err);
            }
        });
    }
    if let Some(complete) = observer.complete {
        gated = gated.with_complete(move || {
            if gate.load(Ordering::SeqCst) {
                complete();
            }
        });
    }
    gated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::runtime::sleep;
    use crate::realtime::event::ChangeKind;
    use crate::realtime::memory::InMemoryChannel;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_observer() -> (PartialObserver<ChangeEvent>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let captured = count.clone();
        let observer = PartialObserver::new().with_next(move |_: &ChangeEvent| {
            captured.fetch_add(1, Ordering::SeqCst);
        });
        (observer, count)
    }

    fn insert_event() -> ChangeEvent {
        ChangeEvent::new(ChangeKind::Insert, "bookmarks").with_owner("user-1")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_stops_delivery_and_releases_once() {
        let channel = Arc::new(InMemoryChannel::new());
        let (observer, count) = counting_observer();
        let subscription = ChangeSubscription::open(
            channel.clone(),
            ChannelTopic::owned_by("bookmarks", "user-1"),
            observer,
        )
        .await
        .unwrap();
        assert!(subscription.is_open());

        channel.publish(insert_event());
        subscription.close().await.unwrap();
        channel.publish(insert_event());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.open_count(), 1);
        assert_eq!(channel.close_count(), 1);
        assert_eq!(channel.duplicate_close_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drop_closes_gate_immediately_and_releases_in_background() {
        let channel = Arc::new(InMemoryChannel::new());
        let (observer, count) = counting_observer();
        let subscription = ChangeSubscription::open(
            channel.clone(),
            ChannelTopic::owned_by("bookmarks", "user-1"),
            observer,
        )
        .await
        .unwrap();

        drop(subscription);
        channel.publish(insert_event());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        for _ in 0..50 {
            if channel.close_count() == 1 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(channel.close_count(), 1);
        assert_eq!(channel.active_count(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_open_leaves_nothing_to_close() {
        let channel = Arc::new(InMemoryChannel::new());
        channel.set_available(false);
        let result = ChangeSubscription::open(
            channel.clone(),
            ChannelTopic::new("bookmarks"),
            PartialObserver::new(),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(channel.close_count(), 0);
    }
}
