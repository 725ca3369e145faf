//! Consumer-side callbacks for poll results.

use tokio::sync::watch;

use crate::error::FetchFailure;

/// Receives the outcome of every completed fetch cycle.
///
/// Both methods are called synchronously on the poller's cycle task,
/// after internal state has been updated and with no lock held.
pub trait PollObserver<T>: Send + Sync {
    /// Called with the value of a successful fetch.
    fn on_result(&self, value: T);

    /// Called once for each failed fetch.
    fn on_error(&self, error: &FetchFailure);
}

/// Observer built from a pair of closures.
pub struct CallbackObserver<R, E> {
    on_result: R,
    on_error: E,
}

impl<R, E> CallbackObserver<R, E> {
    /// Creates an observer from result and error closures.
    pub fn new(on_result: R, on_error: E) -> Self {
        Self {
            on_result,
            on_error,
        }
    }
}

impl<T, R, E> PollObserver<T> for CallbackObserver<R, E>
where
    R: Fn(T) + Send + Sync,
    E: Fn(&FetchFailure) + Send + Sync,
{
    fn on_result(&self, value: T) {
        (self.on_result)(value)
    }

    fn on_error(&self, error: &FetchFailure) {
        (self.on_error)(error)
    }
}

/// Observer that keeps the latest successful value in a watch channel.
///
/// Errors do not clear the last good value; they are recorded separately
/// so a consumer can render stale data alongside the failure.
#[derive(Debug)]
pub struct LatestValue<T> {
    value: watch::Sender<Option<T>>,
    last_error: watch::Sender<Option<String>>,
}

impl<T: Clone + Send + Sync> LatestValue<T> {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self {
            value: watch::Sender::new(None),
            last_error: watch::Sender::new(None),
        }
    }

    /// Subscribes to value updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.value.subscribe()
    }

    /// Returns a clone of the latest successful value.
    pub fn latest(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    /// Returns the message of the most recent failure, cleared on success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }
}

impl<T: Clone + Send + Sync> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> PollObserver<T> for LatestValue<T> {
    fn on_result(&self, value: T) {
        self.value.send_replace(Some(value));
        self.last_error.send_replace(None);
    }

    fn on_error(&self, error: &FetchFailure) {
        self.last_error.send_replace(Some(error.message().to_string()));
    }
}

impl<T, O> PollObserver<T> for std::sync::Arc<O>
where
    O: PollObserver<T> + ?Sized,
{
    fn on_result(&self, value: T) {
        (**self).on_result(value)
    }

    fn on_error(&self, error: &FetchFailure) {
        (**self).on_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_observer_routes_outcomes() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&results);
        let e = Arc::clone(&errors);
        let observer = CallbackObserver::new(
            move |v: u32| r.lock().unwrap().push(v),
            move |_: &FetchFailure| {
                e.fetch_add(1, Ordering::SeqCst);
            },
        );

        observer.on_result(7);
        observer.on_error(&FetchFailure::new("boom"));
        observer.on_result(9);

        assert_eq!(*results.lock().unwrap(), vec![7, 9]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn latest_value_keeps_last_success() {
        let latest = LatestValue::new();
        assert_eq!(latest.latest(), None);

        latest.on_result(vec![1, 2, 3]);
        latest.on_error(&FetchFailure::new("timeout"));

        assert_eq!(latest.latest(), Some(vec![1, 2, 3]));
        assert_eq!(latest.last_error().as_deref(), Some("timeout"));

        latest.on_result(vec![4]);
        assert_eq!(latest.latest(), Some(vec![4]));
        assert_eq!(latest.last_error(), None);
    }

    #[tokio::test]
    async fn latest_value_notifies_subscribers() {
        let latest = LatestValue::new();
        let mut rx = latest.subscribe();

        latest.on_result("ok".to_string());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_deref(), Some("ok"));
    }
}
