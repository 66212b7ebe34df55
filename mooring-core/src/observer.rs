use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use crate::{BackendError, Id};

/// Receives snapshots from a live subscription.
pub trait Observer<T>: Send + Sync {
    /// A new snapshot arrived.
    fn on_next(&self, value: &T);
    /// The subscription failed. It will not retry.
    fn on_error(&self, error: &BackendError);
}

pub type SharedObserver<T> = Arc<dyn Observer<T>>;

/// An observer made of two closures.
pub struct FnObserver<N, E> {
    next: N,
    error: E,
}

impl<T, N, E> Observer<T> for FnObserver<N, E>
where
    N: Fn(&T) + Send + Sync,
    E: Fn(&BackendError) + Send + Sync,
{
    fn on_next(&self, value: &T) {
        (self.next)(value)
    }

    fn on_error(&self, error: &BackendError) {
        (self.error)(error)
    }
}

/// Creates a shared observer from a snapshot callback and an error callback.
pub fn observer<T, N, E>(next: N, error: E) -> SharedObserver<T>
where
    T: 'static,
    N: Fn(&T) + Send + Sync + 'static,
    E: Fn(&BackendError) + Send + Sync + 'static,
{
    Arc::new(FnObserver { next, error })
}

/// Like [observer], but errors are only logged.
pub fn observer_fn<T, N>(next: N) -> SharedObserver<T>
where
    T: 'static,
    N: Fn(&T) + Send + Sync + 'static,
{
    observer(next, |e: &BackendError| log::error!("Subscription failed: {}", e))
}

pub type ObserverId<T> = Id<SharedObserver<T>>;

/// A set of observers sharing the same stream of snapshots.
///
/// Observers are always invoked after the internal lock is released, so they may
/// register or remove observers from within a callback.
pub struct ObserverSet<T> {
    observers: Mutex<BTreeMap<ObserverId<T>, SharedObserver<T>>>,
}

impl<T> ObserverSet<T> {
    pub fn new() -> Self {
        Self {
            observers: Default::default(),
        }
    }

    pub fn insert(&self, observer: SharedObserver<T>) -> ObserverId<T> {
        let id = ObserverId::new();
        self.observers.lock().insert(id, observer);
        id
    }

    /// Removes an observer, returning how many remain.
    pub fn remove(&self, id: ObserverId<T>) -> usize {
        let mut observers = self.observers.lock();
        observers.remove(&id);
        observers.len()
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<SharedObserver<T>> {
        self.observers.lock().values().cloned().collect()
    }

    pub fn notify(&self, value: &T) {
        for observer in self.snapshot() {
            observer.on_next(value);
        }
    }

    pub fn notify_error(&self, error: &BackendError) {
        for observer in self.snapshot() {
            observer.on_error(error);
        }
    }
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle to a live backend listener. The listener is released when the handle is
/// unsubscribed or dropped.
#[must_use = "dropping a subscription releases it immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release()
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn set_fans_out_and_removes() {
        let set = ObserverSet::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let first = {
            let total = total.clone();
            set.insert(observer_fn(move |v: &u32| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            }))
        };
        {
            let total = total.clone();
            set.insert(observer_fn(move |v: &u32| {
                total.fetch_add(*v as usize * 10, Ordering::SeqCst);
            }));
        }

        set.notify(&1);
        assert_eq!(total.load(Ordering::SeqCst), 11);

        assert_eq!(set.remove(first), 1);
        set.notify(&1);
        assert_eq!(total.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let released = released.clone();
            Subscription::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            })
        };
        subscription.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);

        {
            let released = released.clone();
            let _subscription = Subscription::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
