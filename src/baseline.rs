//! Baseline management
//!
//! Baselines are trailing rolling medians over the most recent records. The
//! window counts records, not calendar days, so gaps in the date series do not
//! widen it. Nulls occupy a slot in the window but are excluded from the median.

use std::collections::VecDeque;

/// Default baseline window in records
pub const BASELINE_WINDOW: usize = 7;

/// Trailing rolling median over a fixed number of records
#[derive(Debug, Clone)]
pub struct RollingMedian {
    values: VecDeque<Option<f64>>,
    window_size: usize,
}

impl Default for RollingMedian {
    fn default() -> Self {
        Self::new(BASELINE_WINDOW)
    }
}

impl RollingMedian {
    /// Create a rolling median with the given window size (minimum 1)
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            values: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Push the current record's value and return the median of the window
    /// including it. Returns `None` when every value in the window is null.
    pub fn push(&mut self, value: Option<f64>) -> Option<f64> {
        self.values.push_back(value.filter(|v| !v.is_nan()));
        while self.values.len() > self.window_size {
            self.values.pop_front();
        }
        self.median()
    }

    /// Median of the non-null values currently in the window
    pub fn median(&self) -> Option<f64> {
        let mut present: Vec<f64> = self.values.iter().flatten().copied().collect();
        median(&mut present)
    }

    /// Number of records in the window, null or not
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Trailing rolling median of a series: element `i` is the median of the
/// non-null values among `values[max(0, i - window + 1) ..= i]`.
pub fn rolling_median<I>(values: I, window_size: usize) -> Vec<Option<f64>>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut window = RollingMedian::new(window_size);
    values.into_iter().map(|v| window.push(v)).collect()
}

/// Median of a slice; even-length input averages the two middle values
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
