//! Running Statistics (Welford)
//!
//! Count, mean and sum of squared deviations for one session, updated one
//! sample at a time without keeping history. The recurrence
//!
//! ```text
//! n     += 1
//! delta  = x - mean
//! mean  += delta / n
//! m2    += delta * (x - mean)
//! ```
//!
//! stays accurate for streams with a large magnitude and a small spread, where
//! the sum / sum-of-squares formula cancels catastrophically.
//!
//! [`StatisticsAccumulator`] wraps the state in a single lock so that a
//! monitoring task can take [`StatsSnapshot`]s while the ingestion loop keeps
//! observing. Readers only ever get a [`StatsHandle`], which cannot mutate.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Raw Welford state. `n == 0` implies `mean == 0` and `m2 == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub n: u64,
    pub mean: f64,
    pub m2: f64,
}

impl AccumulatorState {
    pub fn observe(&mut self, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance (`m2 / (n - 1)`), or 0 below two observations.
    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        self.m2 / (self.n - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            n: self.n,
            mean: self.mean,
            std_dev: self.std_dev(),
        }
    }
}

/// Point-in-time view of an accumulator.
///
/// `std_dev == 0.0` for `n < 2` is a sentinel for "not enough data"; the
/// ingestion loop never classifies against it because of the warm-up gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub n: u64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Thread-safe running statistics for a single session.
#[derive(Debug, Default)]
pub struct StatisticsAccumulator {
    state: Mutex<AccumulatorState>,
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `value` into the running statistics and return the state right
    /// after this update, taken under the same lock.
    pub fn observe(&self, value: f64) -> StatsSnapshot {
        let mut state = self.state.lock();
        state.observe(value);
        state.snapshot()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state.lock().snapshot()
    }

    /// Copy of the raw `(n, mean, m2)` triple.
    pub fn state(&self) -> AccumulatorState {
        *self.state.lock()
    }
}

/// Read-only handle to a session's accumulator.
///
/// Cloned out to monitoring code; the ingestion loop keeps the only path to
/// [`StatisticsAccumulator::observe`].
#[derive(Debug, Clone)]
pub struct StatsHandle {
    inner: Arc<StatisticsAccumulator>,
}

impl StatsHandle {
    pub(crate) fn new(inner: Arc<StatisticsAccumulator>) -> Self {
        Self { inner }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.snapshot()
    }
}
