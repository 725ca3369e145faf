//! Fetch sources polled by the adaptive poller.
//!
//! A source is an opaque async capability. The poller never inspects
//! the payload it returns.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchFailure;

/// Trait for data sources the poller invokes on each cycle.
#[async_trait]
pub trait FetchSource<T>: Send + Sync {
    /// Fetches the current value from the backend.
    async fn fetch(&self) -> Result<T, FetchFailure>;
}

#[async_trait]
impl<T, S> FetchSource<T> for Arc<S>
where
    T: Send + 'static,
    S: FetchSource<T> + ?Sized,
{
    async fn fetch(&self) -> Result<T, FetchFailure> {
        (**self).fetch().await
    }
}

/// Source backed by an async closure. Built with [`fetch_fn`].
pub struct FnFetch<F> {
    f: F,
}

/// Wraps a closure returning a future as a [`FetchSource`].
pub fn fetch_fn<F>(f: F) -> FnFetch<F> {
    FnFetch { f }
}

#[async_trait]
impl<T, F, Fut> FetchSource<T> for FnFetch<F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchFailure>> + Send,
{
    async fn fetch(&self) -> Result<T, FetchFailure> {
        (self.f)().await
    }
}
