use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

static BACKGROUND_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("bookmark-sync-background")
        .enable_all()
        .build()
        .ok()
});

/// Spawns a background task on the ambient Tokio runtime.
///
/// Falls back to a shared background runtime when called outside of one, which
/// happens when a subscription is released from a `Drop` impl after the
/// caller's runtime has shut down.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else if let Some(runtime) = BACKGROUND_RUNTIME.as_ref() {
        runtime.spawn(future);
    }
}

/// Asynchronously waits for the provided duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::time::sleep(duration).await;
}
