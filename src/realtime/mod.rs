//! # Realtime
//!
//! Change notifications for the record store. A [`RealtimeChannel`] delivers
//! [`ChangeEvent`]s for a [`ChannelTopic`]; [`ChangeSubscription`] wraps one
//! open registration and guarantees it is released exactly once.
//!
//! Implementations: [`InMemoryChannel`] and the Phoenix-protocol
//! [`WebSocketChannel`].
mod channel;
mod error;
mod event;
mod memory;
mod subscription;
mod websocket;

#[doc(inline)]
pub use channel::{ChannelHandle, RealtimeChannel};

#[doc(inline)]
pub use error::{RealtimeError, RealtimeErrorCode, RealtimeResult};

#[doc(inline)]
pub use event::{ChangeEvent, ChangeKind, ChannelTopic, EventFilter, DEFAULT_SCHEMA};

#[doc(inline)]
pub use memory::{InMemoryChannel, PUBLISHED_HISTORY};

#[doc(inline)]
pub use subscription::ChangeSubscription;

#[doc(inline)]
pub use websocket::{WebSocketChannel, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_JOIN_TIMEOUT};
