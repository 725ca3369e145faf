//! Adaptive poller: interval fetching with backoff and visibility gating.
//!
//! The poller invokes a [`FetchSource`] once when started and then on a
//! recurring timer. Failures double the interval up to the configured
//! ceiling, a success resets it. While the consumer is hidden the timer is
//! cancelled; becoming visible again fetches immediately and re-arms.
//!
//! At most one fetch is in flight per poller. A trigger that arrives while
//! a fetch is pending (a timer tick or [`AdaptivePoller::poll_now`]) is
//! coalesced into a no-op. Hiding or stopping the poller aborts the
//! pending fetch and discards its outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::backoff::BackoffMultiplier;
use crate::config::{PollerConfig, Validate};
use crate::error::{Error, FetchFailure, Result};
use crate::observer::PollObserver;
use crate::source::FetchSource;
use crate::state::{PollerPhase, PollerStatus};

/// What caused a fetch cycle to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Start,
    Timer,
    Visible,
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::Timer => "timer",
            Trigger::Visible => "visible",
            Trigger::Manual => "manual",
        }
    }
}

/// Mutable poller state. Only touched under the shared lock.
struct State {
    backoff: BackoffMultiplier,
    running: bool,
    visible: bool,
    /// Armed recurring timer; present iff `running && visible`.
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is replaced or cancelled.
    timer_seq: u64,
    /// Fetch cycle awaiting the source.
    in_flight: Option<JoinHandle<()>>,
    /// Bumped whenever an in-flight cycle is cancelled.
    epoch: u64,
    cycles_completed: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u64,
    coalesced: u64,
}

struct Shared<T> {
    id: Uuid,
    config: PollerConfig,
    runtime: Handle,
    source: Box<dyn FetchSource<T>>,
    observer: Box<dyn PollObserver<T>>,
    state: Mutex<State>,
    /// Held while an outcome is delivered to the observer. Reentrant so a
    /// callback may stop or hide its own poller.
    delivery: ReentrantMutex<()>,
}

/// Polls a fetch source on an adaptive interval.
///
/// Dropping the poller stops it.
pub struct AdaptivePoller<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> AdaptivePoller<T> {
    /// Creates a stopped poller bound to the current Tokio runtime.
    ///
    /// Fails if the configuration is invalid or no runtime is active.
    pub fn new<S, O>(config: PollerConfig, source: S, observer: O) -> Result<Self>
    where
        S: FetchSource<T> + 'static,
        O: PollObserver<T> + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("adaptive poller needs a Tokio runtime: {}", e)))?;
        Self::with_runtime(runtime, config, source, observer)
    }

    /// Creates a stopped poller that spawns its tasks on `runtime`.
    pub fn with_runtime<S, O>(
        runtime: Handle,
        config: PollerConfig,
        source: S,
        observer: O,
    ) -> Result<Self>
    where
        S: FetchSource<T> + 'static,
        O: PollObserver<T> + 'static,
    {
        config.validate().into_result()?;

        let state = State {
            backoff: BackoffMultiplier::new(config.max_backoff_multiplier),
            running: false,
            visible: config.start_visible,
            timer: None,
            timer_seq: 0,
            in_flight: None,
            epoch: 0,
            cycles_completed: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            coalesced: 0,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4(),
                config,
                runtime,
                source: Box::new(source),
                observer: Box::new(observer),
                state: Mutex::new(state),
                delivery: ReentrantMutex::new(()),
            }),
        })
    }

    /// Starts polling.
    ///
    /// If visible, fetches immediately and arms the timer at the current
    /// effective interval. No-op if already running.
    pub fn start(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.running {
            return;
        }
        state.running = true;

        tracing::info!(
            poller = %shared.id,
            visible = state.visible,
            interval_ms = shared.effective_interval(&state).as_millis() as u64,
            "poller started"
        );

        if state.visible {
            shared.begin_cycle(&mut state, Trigger::Start);
            shared.arm_timer(&mut state);
        }
    }

    /// Stops polling.
    ///
    /// Cancels the timer and any pending fetch. Once this returns no
    /// callback fires until [`start`](Self::start) is called again; a
    /// callback already running on another thread is waited for.
    pub fn stop(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            shared.cancel_timer(&mut state);
            shared.cancel_in_flight(&mut state);
        }
        shared.fence_delivery();

        tracing::info!(poller = %shared.id, "poller stopped");
    }

    /// Records a visibility change from the consumer.
    ///
    /// Becoming visible while running fetches immediately and re-arms the
    /// timer. Becoming hidden cancels the timer and any pending fetch.
    pub fn set_visible(&self, visible: bool) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if state.visible == visible {
                return;
            }
            state.visible = visible;
            if !state.running {
                return;
            }

            if visible {
                tracing::debug!(poller = %shared.id, "consumer visible, resuming");
                shared.begin_cycle(&mut state, Trigger::Visible);
                shared.arm_timer(&mut state);
                return;
            }

            tracing::debug!(poller = %shared.id, "consumer hidden, pausing");
            shared.cancel_timer(&mut state);
            shared.cancel_in_flight(&mut state);
        }
        shared.fence_delivery();
    }

    /// Fetches out of band without touching the timer.
    ///
    /// Returns false if the poller is not armed and visible, or if a fetch
    /// is already in flight.
    pub fn poll_now(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !(state.running && state.visible) {
            return false;
        }
        shared.begin_cycle(&mut state, Trigger::Manual)
    }

    /// Returns the poller instance id.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Returns the configuration the poller was built with.
    pub fn config(&self) -> &PollerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn is_visible(&self) -> bool {
        self.shared.state.lock().visible
    }

    /// Returns true if a recurring timer is armed.
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().timer.is_some()
    }

    /// Returns true if a fetch is awaiting the source.
    pub fn is_in_flight(&self) -> bool {
        self.shared.state.lock().in_flight.is_some()
    }

    /// Returns the current backoff multiplier.
    pub fn current_multiplier(&self) -> u32 {
        self.shared.state.lock().backoff.current()
    }

    /// Returns `base_interval * current_multiplier`.
    pub fn effective_interval(&self) -> Duration {
        let state = self.shared.state.lock();
        self.shared.effective_interval(&state)
    }

    pub fn phase(&self) -> PollerPhase {
        let state = self.shared.state.lock();
        PollerPhase::from_flags(state.running, state.visible)
    }

    /// Returns a snapshot of the poller's state and counters.
    pub fn status(&self) -> PollerStatus {
        let shared = &self.shared;
        let state = shared.state.lock();
        PollerStatus {
            id: shared.id.to_string(),
            phase: PollerPhase::from_flags(state.running, state.visible),
            multiplier: state.backoff.current(),
            effective_interval_ms: shared.effective_interval(&state).as_millis() as u64,
            in_flight: state.in_flight.is_some(),
            cycles_completed: state.cycles_completed,
            successes: state.successes,
            failures: state.failures,
            consecutive_failures: state.consecutive_failures,
            coalesced: state.coalesced,
        }
    }
}

impl<T> Drop for AdaptivePoller<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if let Some(cycle) = state.in_flight.take() {
                cycle.abort();
            }
            state.timer_seq += 1;
            state.epoch += 1;
        }
        drop(self.shared.delivery.lock());
    }
}

impl<T: Send + 'static> Shared<T> {
    fn effective_interval(&self, state: &State) -> Duration {
        state.backoff.interval(self.config.base_interval())
    }

    /// Spawns a fetch cycle unless one is already in flight.
    fn begin_cycle(self: &Arc<Self>, state: &mut State, trigger: Trigger) -> bool {
        if state.in_flight.is_some() {
            state.coalesced += 1;
            tracing::debug!(
                poller = %self.id,
                trigger = trigger.as_str(),
                "fetch already in flight, coalescing"
            );
            return false;
        }

        tracing::debug!(poller = %self.id, trigger = trigger.as_str(), "starting fetch");

        let epoch = state.epoch;
        let shared = Arc::clone(self);
        // The lock is held until the handle is stored, so the cycle cannot
        // complete before `in_flight` is set.
        state.in_flight = Some(self.runtime.spawn(async move {
            let outcome = shared.fetch_once().await;
            shared.complete_cycle(epoch, outcome);
        }));
        true
    }

    /// Runs the source once. A panicking source is reported as a failure
    /// so the cycle still completes and `in_flight` is released.
    async fn fetch_once(&self) -> std::result::Result<T, FetchFailure> {
        let guarded = async {
            AssertUnwindSafe(async { self.source.fetch().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_failure(panic)))
        };
        match self.config.fetch_timeout() {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .unwrap_or_else(|_| Err(FetchFailure::timed_out(limit))),
            None => guarded.await,
        }
    }

    fn complete_cycle(self: &Arc<Self>, epoch: u64, outcome: std::result::Result<T, FetchFailure>) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                tracing::debug!(poller = %self.id, "discarding outcome of cancelled fetch");
                return;
            }
            state.in_flight = None;
            state.cycles_completed += 1;

            let changed = match &outcome {
                Ok(_) => {
                    state.successes += 1;
                    state.consecutive_failures = 0;
                    state.backoff.reset()
                }
                Err(_) => {
                    state.failures += 1;
                    state.consecutive_failures += 1;
                    state.backoff.escalate()
                }
            };

            if changed {
                tracing::info!(
                    poller = %self.id,
                    multiplier = state.backoff.current(),
                    interval_ms = self.effective_interval(&state).as_millis() as u64,
                    "poll interval changed"
                );
                if state.running && state.visible {
                    self.arm_timer(&mut state);
                }
            }
        }

        let _delivery = self.delivery.lock();
        // A stop or hide may have landed since the lock above was released.
        if self.state.lock().epoch != epoch {
            tracing::debug!(poller = %self.id, "discarding outcome of cancelled fetch");
            return;
        }
        match outcome {
            Ok(value) => self.observer.on_result(value),
            Err(error) => {
                tracing::warn!(poller = %self.id, error = %error, "fetch failed");
                self.observer.on_error(&error);
            }
        }
    }

    /// Replaces any armed timer with one at the current effective interval.
    fn arm_timer(self: &Arc<Self>, state: &mut State) {
        self.cancel_timer(state);

        let period = self.effective_interval(state);
        let seq = state.timer_seq;
        let weak = Arc::downgrade(self);
        state.timer = Some(self.runtime.spawn(run_timer(weak, seq, period)));
    }

    fn cancel_timer(&self, state: &mut State) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.timer_seq += 1;
    }

    fn cancel_in_flight(&self, state: &mut State) {
        if let Some(cycle) = state.in_flight.take() {
            cycle.abort();
            tracing::debug!(poller = %self.id, "cancelled in-flight fetch");
        }
        state.epoch += 1;
    }

    /// Waits for any outcome being delivered to the observer.
    fn fence_delivery(&self) {
        drop(self.delivery.lock());
    }

    /// Handles a timer tick. Returns false if the timer has been replaced.
    fn on_tick(self: &Arc<Self>, seq: u64) -> bool {
        let mut state = self.state.lock();
        if state.timer_seq != seq {
            return false;
        }
        self.begin_cycle(&mut state, Trigger::Timer);
        true
    }
}

fn panic_failure(panic: Box<dyn Any + Send>) -> FetchFailure {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    FetchFailure::new(format!("fetch panicked: {}", detail))
}

/// Recurring timer task. Exits when the poller is dropped or re-armed.
async fn run_timer<T: Send + 'static>(weak: Weak<Shared<T>>, seq: u64, period: Duration) {
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if !shared.on_tick(seq) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::LatestValue;
    use crate::source::fetch_fn;

    fn ok_source() -> impl FetchSource<u32> {
        fetch_fn(|| async { Ok::<u32, FetchFailure>(1) })
    }

    #[test]
    fn new_requires_runtime() {
        let result = AdaptivePoller::new(
            PollerConfig::default(),
            ok_source(),
            LatestValue::<u32>::new(),
        );
        assert!(matches!(result, Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let config = PollerConfig::new(Duration::ZERO, 8);
        let result = AdaptivePoller::new(config, ok_source(), LatestValue::<u32>::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn new_poller_is_stopped() {
        let poller =
            AdaptivePoller::new(PollerConfig::default(), ok_source(), LatestValue::new()).unwrap();

        assert!(!poller.is_running());
        assert!(poller.is_visible());
        assert!(!poller.is_armed());
        assert_eq!(poller.phase(), PollerPhase::Stopped);
        assert_eq!(poller.current_multiplier(), 1);
        assert_eq!(poller.effective_interval(), Duration::from_secs(60));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn phase_tracks_start_hide_stop() {
        let poller =
            AdaptivePoller::new(PollerConfig::default(), ok_source(), LatestValue::new()).unwrap();

        poller.start();
        assert_eq!(poller.phase(), PollerPhase::ArmedVisible);
        assert!(poller.is_armed());

        poller.set_visible(false);
        assert_eq!(poller.phase(), PollerPhase::ArmedHidden);
        assert!(!poller.is_armed());
        assert!(poller.is_running());

        poller.stop();
        assert_eq!(poller.phase(), PollerPhase::Stopped);
        assert!(!poller.is_armed());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn visibility_is_remembered_while_stopped() {
        let poller =
            AdaptivePoller::new(PollerConfig::default(), ok_source(), LatestValue::new()).unwrap();

        poller.set_visible(false);
        assert!(!poller.is_visible());

        poller.start();
        assert_eq!(poller.phase(), PollerPhase::ArmedHidden);
        assert!(!poller.is_armed());
        assert!(!poller.is_in_flight());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn poll_now_is_refused_unless_armed_and_visible() {
        let poller =
            AdaptivePoller::new(PollerConfig::default(), ok_source(), LatestValue::new()).unwrap();

        assert!(!poller.poll_now());
        poller.start();
        poller.set_visible(false);
        assert!(!poller.poll_now());
    }
}
