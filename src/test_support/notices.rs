use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::platform::runtime::sleep;
use crate::sync::{SyncController, SyncNotice, SyncState};
use crate::util::{PartialObserver, Unsubscribe};

/// Collects every notice a controller emits while attached.
pub struct NoticeRecorder {
    notices: Arc<Mutex<Vec<SyncNotice>>>,
    _unsubscribe: Unsubscribe,
}

impl NoticeRecorder {
    pub fn attach(controller: &SyncController) -> Self {
        let notices = Arc::new(Mutex::new(Vec::new()));
        let captured = notices.clone();
        let unsubscribe = controller.on_notice(PartialObserver::new().with_next(
            move |notice: &SyncNotice| {
                captured.lock().unwrap().push(notice.clone());
            },
        ));
        Self {
            notices,
            _unsubscribe: unsubscribe,
        }
    }

    pub fn all(&self) -> Vec<SyncNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<SyncState> {
        self.all()
            .into_iter()
            .filter_map(|notice| match notice {
                SyncNotice::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, expected: &SyncNotice) -> bool {
        self.all().contains(expected)
    }
}

/// Polls `condition` for up to two seconds, yielding to background tasks in between.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}
