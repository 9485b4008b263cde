use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type NextFn<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
pub type ErrorFn = Arc<dyn Fn(&dyn Error) + Send + Sync + 'static>;
pub type CompleteFn = Arc<dyn Fn() + Send + Sync + 'static>;

pub struct PartialObserver<T> {
    pub next: Option<NextFn<T>>,
    pub error: Option<ErrorFn>,
    pub complete: Option<CompleteFn>,
}

impl<T> PartialObserver<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.next = Some(Arc::new(callback));
        self
    }

    pub fn with_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn Error) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(callback));
        self
    }

    pub fn with_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.complete = Some(Arc::new(callback));
        self
    }

    pub fn notify_next(&self, value: &T) {
        if let Some(next) = &self.next {
            next(value);
        }
    }

    pub fn notify_error(&self, error: &dyn Error) {
        if let Some(callback) = &self.error {
            callback(error);
        }
    }

    pub fn notify_complete(&self) {
        if let Some(complete) = &self.complete {
            complete();
        }
    }
}

impl<T> Clone for PartialObserver<T> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
        }
    }
}

impl<T> Default for PartialObserver<T> {
    fn default() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }
}

pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// Registry of observers that hands out an [`Unsubscribe`] per registration.
///
/// Callbacks run outside the registry lock, so an observer may register or
/// unregister observers from inside its own callback.
pub struct ObserverList<T> {
    observers: Arc<Mutex<Vec<(u64, PartialObserver<T>)>>>,
    next_id: AtomicU64,
}

impl<T: 'static> ObserverList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: PartialObserver<T>) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, observer));
        let observers = Arc::downgrade(&self.observers);
        Box::new(move || {
            if let Some(observers) = observers.upgrade() {
                observers
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .retain(|(candidate, _)| *candidate != id);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, value: &T) {
        for observer in self.snapshot() {
            observer.notify_next(value);
        }
    }

    pub fn notify_error(&self, error: &dyn Error) {
        for observer in self.snapshot() {
            observer.notify_error(error);
        }
    }

    fn snapshot(&self) -> Vec<PartialObserver<T>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }
}

impl<T: 'static> Default for ObserverList<T> {
    fn default() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }
}
