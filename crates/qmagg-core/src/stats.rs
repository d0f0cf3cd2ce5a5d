//! Sample statistics over real values.

use serde::{Deserialize, Serialize};

/// Accumulates valid values and counts invalid ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    values: Vec<f64>,
    invalid: u32,
}

impl SampleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn add_invalid(&mut self) {
        self.invalid += 1;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn count(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn invalid(&self) -> u32 {
        self.invalid
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    /// Arithmetic mean, 0 when empty.
    ///
    /// Clamped to `[min, max]` so rounding never puts it outside the range.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.values.iter().sum();
        (sum / self.values.len() as f64).clamp(self.min(), self.max())
    }

    /// Unbiased (n - 1) sample standard deviation, 0 when fewer than 2 values.
    pub fn sample_stddev(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let ss: f64 = self.values.iter().map(|v| (v - mean) * (v - mean)).sum();
        (ss / (n - 1) as f64).sqrt()
    }
}

impl FromIterator<f64> for SampleStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            invalid: 0,
        }
    }
}
