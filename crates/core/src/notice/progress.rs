// crates/core/src/notice/progress.rs
//! Progress accounting for one unit of work.
//!
//! A [`Progress`] counts `finished` against `total` and derives a percentage.
//! It is shared (`Arc<Progress>`) between the work loop that advances it,
//! the proxied I/O wrappers that count bytes into it, and the noticer that
//! snapshots it into every outgoing message.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// `total` before anything was added. Distinct from zero, which means
/// "nothing to do" and reports 100%.
pub const TOTAL_UNSET: i64 = -1;

/// Advisory cancellation check polled by work loops.
pub trait ExitCheck: Send + Sync {
    fn is_exited(&self) -> bool;
}

impl ExitCheck for CancellationToken {
    fn is_exited(&self) -> bool {
        self.is_cancelled()
    }
}

/// Exit check that flips once, when the parent token is cancelled or the
/// timeout elapses, whichever comes first. It cannot be re-armed.
#[derive(Debug, Clone)]
pub struct TimeoutCheck {
    token: CancellationToken,
    deadline: Instant,
}

impl TimeoutCheck {
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    /// Token cancelled at the flip. Cancelling it by hand also flips the check.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolve once the check has flipped.
    pub async fn exited(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => self.token.cancel(),
        }
    }
}

impl ExitCheck for TimeoutCheck {
    fn is_exited(&self) -> bool {
        if !self.token.is_cancelled() && Instant::now() >= self.deadline {
            self.token.cancel();
        }
        self.token.is_cancelled()
    }
}

/// Serialisable copy of a [`Progress`] taken at send time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub total: i64,
    pub finished: i64,
    pub percent: f64,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    total: i64,
    finished: i64,
    percent_override: Option<f64>,
    complete: bool,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            total: TOTAL_UNSET,
            finished: 0,
            percent_override: None,
            complete: false,
        }
    }
}

impl Counters {
    fn percent(&self) -> f64 {
        if let Some(p) = self.percent_override {
            return p;
        }
        match self.total {
            t if t < 0 => 0.0,
            0 => 100.0,
            t => (self.finished as f64 * 100.0 / t as f64).clamp(0.0, 100.0),
        }
    }
}

/// Total/finished counters with a derived percentage.
///
/// The counters sit behind one mutex so `add`'s phase reset and total bump
/// are never observed half-applied.
pub struct Progress {
    counters: Mutex<Counters>,
    auto_complete: AtomicBool,
    check: Option<Arc<dyn ExitCheck>>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            auto_complete: AtomicBool::new(false),
            check: None,
        }
    }

    pub fn with_exit_check(mut self, check: Arc<dyn ExitCheck>) -> Self {
        self.check = Some(check);
        self
    }

    /// Declare the work complete as soon as `finished >= total`.
    pub fn set_auto_complete(&self, on: bool) {
        self.auto_complete.store(on, Ordering::Relaxed);
    }

    /// Add `n` units to the expected total.
    ///
    /// If work was already finished, `finished` restarts from zero first, so
    /// the new units are counted against everything added so far. The total
    /// itself keeps growing.
    pub fn add(&self, n: i64) {
        let mut c = self.lock();
        if c.finished > 0 {
            c.finished = 0;
        }
        if c.total < 0 {
            c.total = 0;
        }
        c.total += n;
        c.percent_override = None;
    }

    /// Record `n` finished units and return the new finished count.
    pub fn done(&self, n: i64) -> i64 {
        let mut c = self.lock();
        c.finished += n;
        c.percent_override = None;
        if self.auto_complete.load(Ordering::Relaxed) && c.total >= 0 && c.finished >= c.total {
            c.complete = true;
        }
        c.finished
    }

    /// Percentage in `[0, 100]`: 0 while the total is unset, 100 for an
    /// empty total, otherwise `finished / total`.
    pub fn calc_percent(&self) -> f64 {
        self.lock().percent()
    }

    /// Override the derived percentage until the next `add` or `done`.
    pub fn set_percent(&self, percent: f64) {
        self.lock().percent_override = Some(percent.clamp(0.0, 100.0));
    }

    pub fn total(&self) -> i64 {
        self.lock().total
    }

    pub fn finished(&self) -> i64 {
        self.lock().finished
    }

    pub fn complete(&self) {
        self.lock().complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    /// Back to the freshly-constructed state. The exit check is kept.
    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    /// Advisory: work loops poll this and stop on their own.
    pub fn is_exited(&self) -> bool {
        self.check.as_ref().is_some_and(|c| c.is_exited())
    }

    pub fn snapshot(&self) -> ProgressInfo {
        let c = *self.lock();
        ProgressInfo {
            total: c.total,
            finished: c.finished,
            percent: c.percent(),
            complete: c.complete,
        }
    }

    /// Run `exec`, turning the byte counts it reports into whole
    /// percentage points of a fresh 100-unit phase. Earlier counters are
    /// reset first.
    ///
    /// `exec` receives a callback taking the number of bytes just consumed,
    /// out of an expected `total`. On `Ok` the undistributed remainder is
    /// flushed so the phase always ends at exactly 100%.
    pub fn callback<T, E>(
        &self,
        total: u64,
        exec: impl FnOnce(&mut dyn FnMut(u64)) -> Result<T, E>,
    ) -> Result<T, E> {
        self.reset();
        self.add(100);
        let mut tracker = PercentTracker::new(total);
        let result = exec(&mut |n| {
            let delta = tracker.advance(n);
            if delta > 0 {
                self.done(delta);
            }
        });
        if result.is_ok() {
            let remainder = tracker.remainder();
            if remainder > 0 {
                self.done(remainder);
            }
        }
        result
    }

    /// Async form of [`Progress::callback`]: `exec` gets a cloneable
    /// [`PercentFeed`] it can move into its future.
    pub async fn callback_async<F, Fut, T, E>(self: &Arc<Self>, total: u64, exec: F) -> Result<T, E>
    where
        F: FnOnce(PercentFeed) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.reset();
        self.add(100);
        let feed = PercentFeed {
            progress: Arc::clone(self),
            tracker: Arc::new(Mutex::new(PercentTracker::new(total))),
        };
        let result = exec(feed.clone()).await;
        if result.is_ok() {
            let remainder = feed.tracker_lock().remainder();
            if remainder > 0 {
                self.done(remainder);
            }
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned locking progress counters: {e}");
            e.into_inner()
        })
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("counters", &*self.lock())
            .field("auto_complete", &self.auto_complete.load(Ordering::Relaxed))
            .field("has_exit_check", &self.check.is_some())
            .finish()
    }
}

/// Converts byte deltas into whole percentage points, carrying the
/// fractional part forward.
#[derive(Debug)]
struct PercentTracker {
    expected: u64,
    consumed: u64,
    reported: i64,
}

impl PercentTracker {
    fn new(expected: u64) -> Self {
        Self {
            expected,
            consumed: 0,
            reported: 0,
        }
    }

    /// Points newly crossed by consuming `n` more bytes.
    fn advance(&mut self, n: u64) -> i64 {
        if self.expected == 0 {
            return 0;
        }
        self.consumed = self.consumed.saturating_add(n);
        let points = (self.consumed.min(self.expected) as u128 * 100 / self.expected as u128) as i64;
        let delta = points - self.reported;
        if delta > 0 {
            self.reported = points;
        }
        delta.max(0)
    }

    fn remainder(&mut self) -> i64 {
        let rest = 100 - self.reported;
        self.reported = 100;
        rest.max(0)
    }
}

/// Byte-count sink handed to [`Progress::callback_async`] work.
#[derive(Debug, Clone)]
pub struct PercentFeed {
    progress: Arc<Progress>,
    tracker: Arc<Mutex<PercentTracker>>,
}

impl PercentFeed {
    /// Report `n` bytes just consumed.
    pub fn feed(&self, n: u64) {
        let delta = self.tracker_lock().advance(n);
        if delta > 0 {
            self.progress.done(delta);
        }
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    fn tracker_lock(&self) -> MutexGuard<'_, PercentTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }
}
