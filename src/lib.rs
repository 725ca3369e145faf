//! Adaptive Poller - interval fetching with backoff and visibility gating
//!
//! This library repeatedly invokes an async fetch source on a timer,
//! publishing results to an observer. Consecutive failures back the
//! interval off exponentially up to a ceiling, and polling pauses while
//! the consumer is hidden, refreshing immediately when it returns.

pub mod backoff;
pub mod config;
pub mod error;
pub mod observer;
pub mod poller;
pub mod source;
pub mod state;

pub use backoff::BackoffMultiplier;
pub use config::{PollerConfig, Validate, ValidationResult};
pub use error::{Error, FetchFailure, Result};
pub use observer::{CallbackObserver, LatestValue, PollObserver};
pub use poller::AdaptivePoller;
pub use source::{fetch_fn, FetchSource, FnFetch};
pub use state::{PollerPhase, PollerStatus};
