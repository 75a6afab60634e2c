//! Value history of a single metric.

use std::collections::VecDeque;

/// Bounded history of one metric, aligned with the session clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    /// Emitted values, oldest first. At most one element for latest-only
    /// metrics.
    pub values: VecDeque<f64>,
    /// Last raw value ingested, `None` until the first observation.
    pub last_value: Option<f64>,
    pub visible: bool,
}

impl MetricSeries {
    pub fn new(visible: bool) -> Self {
        Self {
            values: VecDeque::new(),
            last_value: None,
            visible,
        }
    }

    /// Appends `value`, or overwrites the sole slot when history is off.
    pub fn push(&mut self, value: f64, save_history: bool) {
        if save_history {
            self.values.push_back(value);
        } else if let Some(slot) = self.values.front_mut() {
            *slot = value;
        } else {
            self.values.push_back(value);
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.last_value = None;
    }
}

/// Deviation from the previous sample that marks a boundary value as a
/// sampling artifact.
pub const SMOOTHING_THRESHOLD: f64 = 10.0;

/// Number of trailing samples averaged to replace an artifact.
pub const SMOOTHING_WINDOW: usize = 3;

/// Applies boundary smoothing to `value` before it is stored in `series`.
///
/// A series holding a single 0 is first backfilled with `value`. Otherwise a
/// value of exactly 0 or 100 that jumps more than `SMOOTHING_THRESHOLD` away
/// from the previous sample is replaced by the truncated mean of the last
/// `SMOOTHING_WINDOW` samples. Returns the value to store.
pub fn smooth_boundary(series: &mut MetricSeries, value: f64) -> f64 {
    if series.values.len() == 1 && series.values[0] == 0.0 {
        series.values[0] = value;
        return value;
    }

    let is_boundary = value == 0.0 || value == 100.0;
    let previous = series.latest().unwrap_or(0.0);
    if is_boundary && (value - previous).abs() > SMOOTHING_THRESHOLD {
        let recent: Vec<f64> = series
            .values
            .iter()
            .rev()
            .take(SMOOTHING_WINDOW)
            .copied()
            .collect();
        if !recent.is_empty() {
            let mean = recent.iter().sum::<f64>() / recent.len() as f64;
            return mean.trunc();
        }
    }
    value
}
