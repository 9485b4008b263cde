use std::fmt;

use async_trait::async_trait;

use crate::realtime::error::RealtimeResult;
use crate::realtime::event::{ChangeEvent, ChannelTopic};
use crate::util::PartialObserver;

/// Opaque reference to one open subscription on a [`RealtimeChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelHandle(u64);

impl ChannelHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Change notification transport.
///
/// Matching events go to the observer's `next` callback. An unexpected close
/// is reported once through `error`; the handle must still be released with
/// [`unsubscribe`](RealtimeChannel::unsubscribe).
#[async_trait]
pub trait RealtimeChannel: Send + Sync + 'static {
    async fn subscribe(
        &self,
        topic: &ChannelTopic,
        observer: PartialObserver<ChangeEvent>,
    ) -> RealtimeResult<ChannelHandle>;

    async fn unsubscribe(&self, handle: ChannelHandle) -> RealtimeResult<()>;
}
