//! Test utilities shared across crate-level unit tests.

pub mod app;
pub mod notices;

pub use app::{signed_in_test_app, test_settings};
pub use notices::{wait_until, NoticeRecorder};
