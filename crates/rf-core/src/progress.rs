//! Progress aggregation.
//!
//! A [`ProgressAggregator`] owns the single 0-100 progress signal of one
//! top-level call. Sub-stages get a [`StageProgress`] view onto a slice of
//! that range and report in whatever unit they have (ratio, counts, elapsed
//! time). The aggregate never moves backwards.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Elapsed-time estimates never claim more than this share of a stage.
const ELAPSED_CAP: f64 = 0.95;

type Callback = Box<dyn Fn(u8, &str) + Send + Sync>;

struct Inner {
    value: Mutex<f64>,
    tx: watch::Sender<u8>,
    callback: Option<Callback>,
}

/// Monotonic 0-100 progress signal shared by every stage of one call.
#[derive(Clone)]
pub struct ProgressAggregator {
    inner: Arc<Inner>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("value", &*self.inner.value.lock())
            .finish_non_exhaustive()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an aggregator that also forwards every change to `callback`.
    pub fn with_callback(callback: impl Fn(u8, &str) + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(callback)))
    }

    fn build(callback: Option<Callback>) -> Self {
        let (tx, _rx) = watch::channel(0u8);
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(0.0),
                tx,
                callback,
            }),
        }
    }

    /// Observe the integer progress stream.
    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.inner.tx.subscribe()
    }

    /// Current aggregate progress.
    pub fn value(&self) -> u8 {
        *self.inner.tx.borrow()
    }

    /// Report an absolute percentage. Values below the current one are ignored.
    pub fn report(&self, percent: f64, step: &str) {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        let emitted = {
            let mut value = self.inner.value.lock();
            if percent <= *value {
                return;
            }
            *value = percent;
            percent.floor() as u8
        };
        let changed = self.inner.tx.send_if_modified(|v| {
            if emitted > *v {
                *v = emitted;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!("[{emitted}%] {step}");
            if let Some(ref cb) = self.inner.callback {
                cb(emitted, step);
            }
        }
    }

    /// A view onto `[start, end]` of the aggregate range.
    pub fn stage(&self, start: f64, end: f64, name: impl Into<String>) -> StageProgress {
        StageProgress {
            aggregator: self.clone(),
            start,
            end,
            name: Arc::from(name.into()),
        }
    }
}

/// A slice of the aggregate progress range owned by one stage.
#[derive(Clone)]
pub struct StageProgress {
    aggregator: ProgressAggregator,
    start: f64,
    end: f64,
    name: Arc<str>,
}

impl fmt::Debug for StageProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageProgress")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl StageProgress {
    /// A stage view that reports into a throwaway aggregator.
    pub fn detached() -> Self {
        ProgressAggregator::new().stage(0.0, 100.0, "detached")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    /// Map a completion ratio (clamped to `[0, 1]`) into this stage's range.
    pub fn ratio(&self, ratio: f64) -> f64 {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        self.start + ratio * (self.end - self.start)
    }

    /// Report a completion ratio.
    pub fn report_ratio(&self, ratio: f64) {
        self.aggregator.report(self.ratio(ratio), &self.name);
    }

    /// Report `done` of `total` units finished.
    pub fn report_count(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        self.report_ratio(done as f64 / total as f64);
    }

    /// Report elapsed time against an expected stage length. Capped below
    /// completion so only [`complete`](Self::complete) reaches the end.
    pub fn report_elapsed(&self, elapsed: Duration, expected: Duration) {
        if expected.is_zero() {
            return;
        }
        let ratio = (elapsed.as_secs_f64() / expected.as_secs_f64()).min(ELAPSED_CAP);
        self.report_ratio(ratio);
    }

    /// Mark the stage finished.
    pub fn complete(&self) {
        self.report_ratio(1.0);
    }

    /// A nested view covering `[from, to]` (ratios of this stage's range).
    pub fn sub(&self, from: f64, to: f64, name: impl Into<String>) -> StageProgress {
        self.aggregator.stage(self.ratio(from), self.ratio(to), name)
    }

    /// The aggregator this view reports into.
    pub fn aggregator(&self) -> &ProgressAggregator {
        &self.aggregator
    }

    /// A counter that reports `done / total` into this stage as units finish.
    pub fn counter(&self, total: usize) -> ProgressCounter {
        ProgressCounter {
            stage: self.clone(),
            done: AtomicUsize::new(0),
            total,
        }
    }
}

/// Counts finished units for a stage; safe to tick from concurrent tasks.
#[derive(Debug)]
pub struct ProgressCounter {
    stage: StageProgress,
    done: AtomicUsize,
    total: usize,
}

impl ProgressCounter {
    /// Record one finished unit.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.stage.report_count(done.min(self.total), self.total);
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}
