pub mod backoff;
pub mod subscribe;

pub use backoff::{backoff_delay, calculate_backoff_millis, BackoffConfig, MAX_BACKOFF_MILLIS};
pub use subscribe::{ObserverList, PartialObserver, Unsubscribe};
