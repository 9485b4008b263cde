use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{Sender, TrySendError};
use tokio::sync::watch;

use crate::platform::runtime::spawn_detached;

struct SchedulerInner {
    trigger: Sender<()>,
    requested: Arc<AtomicU64>,
    completed: watch::Receiver<u64>,
    stopped: Arc<AtomicBool>,
}

/// Runs a refresh job on a background worker, one run at a time.
///
/// Requests made while a run is in flight collapse into a single trailing
/// run: the trigger queue holds at most one entry, and each run covers every
/// request counted before it started.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn spawn<F, Fut>(job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (trigger, pending) = async_channel::bounded(1);
        let (done, completed) = watch::channel(0u64);
        let requested = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));

        let worker_requested = requested.clone();
        let worker_stopped = stopped.clone();
        spawn_detached(async move {
            while pending.recv().await.is_ok() {
                if worker_stopped.load(Ordering::SeqCst) {
                    break;
                }
                let covered = worker_requested.load(Ordering::SeqCst);
                job().await;
                done.send_replace(covered);
            }
        });

        Self {
            inner: Arc::new(SchedulerInner {
                trigger,
                requested,
                completed,
                stopped,
            }),
        }
    }

    /// Enqueues a refresh without waiting. Returns `false` once stopped.
    pub fn request(&self) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.requested.fetch_add(1, Ordering::SeqCst);
        match self.inner.trigger.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }

    /// Requests not yet covered by a finished run.
    pub fn pending(&self) -> u64 {
        let requested = self.inner.requested.load(Ordering::SeqCst);
        requested.saturating_sub(*self.inner.completed.borrow())
    }

    /// Resolves once every request made before this call has been served, or
    /// the scheduler has stopped.
    pub async fn wait_until_settled(&self) {
        let target = self.inner.requested.load(Ordering::SeqCst);
        let mut completed = self.inner.completed.clone();
        let _ = completed.wait_for(|done| *done >= target).await;
    }

    /// Stops the worker after the run in flight, if any. Pending requests are dropped.
    pub fn close(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.trigger.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::runtime::sleep;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn requests_during_a_run_coalesce_into_one_trailing_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Semaphore::new(0));
        let job_runs = runs.clone();
        let job_release = release.clone();
        let scheduler = RefreshScheduler::spawn(move || {
            let runs = job_runs.clone();
            let release = job_release.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                release.acquire().await.unwrap().forget();
            }
        });

        assert!(scheduler.request());
        wait_for(|| runs.load(Ordering::SeqCst) == 1).await;
        for _ in 0..5 {
            assert!(scheduler.request());
        }
        release.add_permits(10);
        scheduler.wait_until_settled().await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn settled_immediately_without_requests() {
        let scheduler = RefreshScheduler::spawn(|| async {});
        scheduler.wait_until_settled().await;
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closed_scheduler_refuses_requests_and_releases_waiters() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job_runs = runs.clone();
        let scheduler = RefreshScheduler::spawn(move || {
            let runs = job_runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        scheduler.close();
        assert!(scheduler.is_closed());
        assert!(!scheduler.request());

        tokio::time::timeout(Duration::from_secs(1), scheduler.wait_until_settled())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
