//! Z-score classification against a statistics snapshot.

use crate::stats::StatsSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_anomaly: bool,
    /// `|value - mean|`
    pub deviation: f64,
    /// `k * std_dev`
    pub threshold: f64,
}

/// Flags `value` when it lies strictly more than `k` standard deviations away
/// from the snapshot mean.
///
/// With `std_dev == 0` every value that differs from the mean is flagged, so
/// callers must not classify before the warm-up count is reached. NaN on
/// either side compares false and is never flagged.
pub fn classify(value: f64, snapshot: &StatsSnapshot, k: f64) -> ClassificationResult {
    let deviation = (value - snapshot.mean).abs();
    let threshold = k * snapshot.std_dev;
    ClassificationResult {
        is_anomaly: deviation > threshold,
        deviation,
        threshold,
    }
}
