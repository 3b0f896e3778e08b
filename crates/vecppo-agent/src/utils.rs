//! Schedules and running statistics

use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Value that changes with the number of frames seen
pub trait Schedule: Send + Sync {
    /// Get value at frame `t`
    fn value(&self, t: usize) -> f64;
}

/// Linear schedule from `start` to `end` over `steps`, then constant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSchedule {
    /// Starting value
    pub start: f64,
    /// Ending value
    pub end: f64,
    /// Number of steps for the interpolation
    pub steps: usize,
}

impl LinearSchedule {
    /// Create a new linear schedule
    #[must_use]
    pub fn new(start: f64, end: f64, steps: usize) -> Self {
        Self { start, end, steps }
    }
}

impl Schedule for LinearSchedule {
    fn value(&self, t: usize) -> f64 {
        if t >= self.steps {
            self.end
        } else {
            let progress = t as f64 / self.steps as f64;
            self.start + (self.end - self.start) * progress
        }
    }
}

/// Per-feature running mean and variance (parallel Welford merge)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningMeanStd {
    /// Mean
    pub mean: Array1<f64>,
    /// Variance
    pub var: Array1<f64>,
    /// Number of samples seen
    pub count: f64,
}

impl RunningMeanStd {
    /// Create new running statistics over `dim` features
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            var: Array1::ones(dim),
            count: 0.0,
        }
    }

    /// Merge a `(batch, dim)` block of samples
    pub fn update(&mut self, batch: ArrayView2<'_, f32>) {
        let n = batch.nrows();
        if n == 0 {
            return;
        }
        let batch = batch.mapv(f64::from);
        let batch_count = n as f64;
        let Some(batch_mean) = batch.mean_axis(Axis(0)) else {
            return;
        };
        let batch_var = batch.var_axis(Axis(0), 0.0);

        let delta = &batch_mean - &self.mean;
        let total = self.count + batch_count;
        let new_mean = &self.mean + &(&delta * (batch_count / total));
        let m2 = &self.var * self.count
            + &batch_var * batch_count
            + &(&delta * &delta) * (self.count * batch_count / total);

        self.mean = new_mean;
        self.var = m2 / total;
        self.count = total;
    }

    /// Standard deviation per feature
    #[must_use]
    pub fn std(&self) -> Array1<f64> {
        self.var.mapv(f64::sqrt)
    }
}

/// Running observation normalizer: `clip((x - mean) / sqrt(max(var, floor)))`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationFilter {
    /// Running statistics
    pub stats: RunningMeanStd,
    /// Lower bound applied to the variance
    pub var_floor: f64,
    /// Symmetric clip applied after normalization
    pub clip: f64,
    /// Whether `filter` updates the statistics
    pub update_stats: bool,
}

impl ObservationFilter {
    /// Create a filter over `dim` features with variance floor 1e-2 and clip 5
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            stats: RunningMeanStd::new(dim),
            var_floor: 1e-2,
            clip: 5.0,
            update_stats: true,
        }
    }

    /// Normalize a `(batch, dim)` block, updating the statistics first
    pub fn filter(&mut self, obs: ArrayView2<'_, f32>) -> Array2<f32> {
        if self.update_stats {
            self.stats.update(obs);
        }
        self.apply(obs)
    }

    /// Normalize without touching the statistics
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply(&self, obs: ArrayView2<'_, f32>) -> Array2<f32> {
        let scale = self.stats.var.mapv(|v| v.max(self.var_floor).sqrt());
        let mut out = obs.mapv(f64::from);
        out -= &self.stats.mean;
        out /= &scale;
        out.mapv(|x| x.clamp(-self.clip, self.clip) as f32)
    }
}
