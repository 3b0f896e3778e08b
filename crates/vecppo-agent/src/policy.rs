//! Pure ndarray MLP actor-critic with a diagonal Gaussian action head
//!
//! Two tanh hidden layers feed a linear value head and a linear action-mean
//! head. The log standard deviation is shared by every action dimension and
//! follows a linear schedule over the training frames, so it is not a
//! trainable parameter.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use vecppo_core::{
    ActionEvaluation, ActionSample, ActorCritic, OutputGradients, PpoError, Result,
};

use crate::utils::{LinearSchedule, Schedule};

const HALF_LN_2PI: f32 = 0.918_938_5;

/// MLP policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    /// Width of both hidden layers
    pub hidden: usize,
    /// Log-std at frame 0
    pub std_start: f32,
    /// Log-std once `total_frames` frames were collected
    pub std_stop: f32,
    /// Frames over which the log-std is annealed
    pub total_frames: usize,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden: 64,
            std_start: -0.6,
            std_stop: -1.7,
            total_frames: 1_000_000,
        }
    }
}

/// Activations of the last `evaluate_actions` call
#[derive(Debug, Clone)]
struct ForwardCache {
    input: Array2<f32>,
    h1: Array2<f32>,
    h2: Array2<f32>,
    mean: Array2<f32>,
    actions: Array2<f32>,
}

struct Forward {
    h1: Array2<f32>,
    h2: Array2<f32>,
    values: Array1<f32>,
    mean: Array2<f32>,
}

/// Two-layer tanh MLP with value and Gaussian-mean heads
#[derive(Debug, Clone)]
pub struct MlpGaussianPolicy {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
    wv: Array2<f32>,
    bv: Array1<f32>,
    wa: Array2<f32>,
    ba: Array1<f32>,
    std_schedule: LinearSchedule,
    frames: usize,
    cache: Option<ForwardCache>,
}

impl MlpGaussianPolicy {
    /// Create a policy with normalised-column weights and zero biases
    pub fn new<R: Rng + ?Sized>(
        state_dim: usize,
        action_dim: usize,
        config: &MlpConfig,
        rng: &mut R,
    ) -> Result<Self> {
        if state_dim == 0 || action_dim == 0 || config.hidden == 0 {
            return Err(PpoError::InvalidConfig(format!(
                "policy needs non-zero sizes, got state_dim={state_dim} action_dim={action_dim} hidden={}",
                config.hidden
            )));
        }
        let h = config.hidden;
        Ok(Self {
            w1: Self::normc_init(state_dim, h, rng),
            b1: Array1::zeros(h),
            w2: Self::normc_init(h, h, rng),
            b2: Array1::zeros(h),
            wv: Self::normc_init(h, 1, rng),
            bv: Array1::zeros(1),
            wa: Self::normc_init(h, action_dim, rng),
            ba: Array1::zeros(action_dim),
            std_schedule: LinearSchedule::new(
                f64::from(config.std_start),
                f64::from(config.std_stop),
                config.total_frames,
            ),
            frames: 0,
            cache: None,
        })
    }

    /// Gaussian weights rescaled so each output unit's incoming weights have unit norm
    fn normc_init<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, rng: &mut R) -> Array2<f32> {
        let mut w = Array2::from_shape_simple_fn((in_dim, out_dim), || {
            StandardNormal.sample(&mut *rng)
        });
        for mut column in w.columns_mut() {
            let norm = column.iter().map(|x: &f32| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                column.mapv_inplace(|x| x / norm);
            }
        }
        w
    }

    /// Current shared log standard deviation
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn log_std(&self) -> f32 {
        self.std_schedule.value(self.frames) as f32
    }

    /// Frames reported through [`ActorCritic::advance_frames`]
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of trainable parameters
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.w1.len()
            + self.b1.len()
            + self.w2.len()
            + self.b2.len()
            + self.wv.len()
            + self.bv.len()
            + self.wa.len()
            + self.ba.len()
    }

    fn check_states(&self, states: ArrayView2<'_, f32>) -> Result<()> {
        if states.ncols() != self.w1.nrows() {
            return Err(PpoError::dims("policy state_dim", self.w1.nrows(), states.ncols()));
        }
        Ok(())
    }

    fn forward(&self, states: ArrayView2<'_, f32>) -> Forward {
        let h1 = (states.dot(&self.w1) + &self.b1).mapv(f32::tanh);
        let h2 = (h1.dot(&self.w2) + &self.b2).mapv(f32::tanh);
        let values = (h2.dot(&self.wv) + &self.bv).column(0).to_owned();
        let mean = h2.dot(&self.wa) + &self.ba;
        Forward { h1, h2, values, mean }
    }

    /// Per-row log-density of `actions` under `N(mean, exp(log_std)²)`
    fn log_probs(mean: &Array2<f32>, actions: ArrayView2<'_, f32>, log_std: f32) -> Array1<f32> {
        let std = log_std.exp();
        let z = (&actions - mean) / std;
        z.mapv(|z| -0.5 * z * z - HALF_LN_2PI - log_std).sum_axis(Axis(1))
    }

    fn entropy(&self) -> f32 {
        self.wa.ncols() as f32 * (0.5 + HALF_LN_2PI + self.log_std())
    }
}

fn column_sum(x: &Array2<f32>) -> Array1<f32> {
    x.sum_axis(Axis(0))
}

/// Copy `params[*offset..]` into `dst` in logical order and advance `offset`
fn fill<'a>(dst: impl Iterator<Item = &'a mut f32>, params: &[f32], offset: &mut usize) {
    for (d, &p) in dst.zip(&params[*offset..]) {
        *d = p;
        *offset += 1;
    }
}

impl ActorCritic for MlpGaussianPolicy {
    fn state_dim(&self) -> usize {
        self.w1.nrows()
    }

    fn action_dim(&self) -> usize {
        self.wa.ncols()
    }

    fn sample(
        &self,
        states: ArrayView2<'_, f32>,
        rng: &mut dyn RngCore,
        deterministic: bool,
    ) -> Result<ActionSample> {
        self.check_states(states)?;
        let Forward { values, mean, .. } = self.forward(states);
        let log_std = self.log_std();
        let std = log_std.exp();

        let actions = if deterministic {
            mean.clone()
        } else {
            let noise = Array2::from_shape_simple_fn(mean.raw_dim(), || -> f32 {
                StandardNormal.sample(&mut *rng)
            });
            &mean + &(noise * std)
        };
        let log_probs = Self::log_probs(&mean, actions.view(), log_std);

        Ok(ActionSample {
            values,
            actions,
            log_probs,
            action_std: std,
        })
    }

    fn value(&self, states: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
        self.check_states(states)?;
        Ok(self.forward(states).values)
    }

    fn evaluate_actions(
        &mut self,
        states: ArrayView2<'_, f32>,
        actions: ArrayView2<'_, f32>,
    ) -> Result<ActionEvaluation> {
        self.check_states(states)?;
        if actions.dim() != (states.nrows(), self.action_dim()) {
            return Err(PpoError::dims(
                "evaluated actions",
                states.nrows() * self.action_dim(),
                actions.len(),
            ));
        }

        let Forward { h1, h2, values, mean } = self.forward(states);
        let log_probs = Self::log_probs(&mean, actions, self.log_std());
        let entropy = self.entropy();

        self.cache = Some(ForwardCache {
            input: states.to_owned(),
            h1,
            h2,
            mean,
            actions: actions.to_owned(),
        });

        Ok(ActionEvaluation {
            values,
            log_probs,
            entropy,
        })
    }

    fn backward(&mut self, grads: &OutputGradients) -> Result<Array1<f32>> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| PpoError::Policy("backward called before evaluate_actions".into()))?;
        let b = cache.input.nrows();
        if grads.values.len() != b || grads.log_probs.len() != b {
            return Err(PpoError::dims("output gradients", b, grads.values.len().min(grads.log_probs.len())));
        }

        // d log_prob / d mean = (a - mean) / sigma^2; the log-std is scheduled, so
        // the entropy gradient has no trainable path.
        let var = (2.0 * self.log_std()).exp();
        let g_lp = grads.log_probs.view().insert_axis(Axis(1));
        let d_mean = (&cache.actions - &cache.mean) * &g_lp / var;
        let d_value = grads.values.view().insert_axis(Axis(1)).to_owned();

        let d_wa = cache.h2.t().dot(&d_mean);
        let d_ba = column_sum(&d_mean);
        let d_wv = cache.h2.t().dot(&d_value);
        let d_bv = column_sum(&d_value);

        let d_h2 = d_mean.dot(&self.wa.t()) + d_value.dot(&self.wv.t());
        let d_z2 = d_h2 * &cache.h2.mapv(|h| 1.0 - h * h);
        let d_w2 = cache.h1.t().dot(&d_z2);
        let d_b2 = column_sum(&d_z2);

        let d_h1 = d_z2.dot(&self.w2.t());
        let d_z1 = d_h1 * &cache.h1.mapv(|h| 1.0 - h * h);
        let d_w1 = cache.input.t().dot(&d_z1);
        let d_b1 = column_sum(&d_z1);

        let mut flat = Vec::with_capacity(self.num_parameters());
        flat.extend(d_w1.iter());
        flat.extend(d_b1.iter());
        flat.extend(d_w2.iter());
        flat.extend(d_b2.iter());
        flat.extend(d_wv.iter());
        flat.extend(d_bv.iter());
        flat.extend(d_wa.iter());
        flat.extend(d_ba.iter());
        Ok(Array1::from_vec(flat))
    }

    fn parameters(&self) -> Array1<f32> {
        let mut flat = Vec::with_capacity(self.num_parameters());
        flat.extend(self.w1.iter());
        flat.extend(self.b1.iter());
        flat.extend(self.w2.iter());
        flat.extend(self.b2.iter());
        flat.extend(self.wv.iter());
        flat.extend(self.bv.iter());
        flat.extend(self.wa.iter());
        flat.extend(self.ba.iter());
        Array1::from_vec(flat)
    }

    fn set_parameters(&mut self, params: ArrayView1<'_, f32>) -> Result<()> {
        let expected = self.num_parameters();
        if params.len() != expected {
            return Err(PpoError::dims("policy parameters", expected, params.len()));
        }
        let params = params.to_vec();
        let mut offset = 0;
        fill(self.w1.iter_mut(), &params, &mut offset);
        fill(self.b1.iter_mut(), &params, &mut offset);
        fill(self.w2.iter_mut(), &params, &mut offset);
        fill(self.b2.iter_mut(), &params, &mut offset);
        fill(self.wv.iter_mut(), &params, &mut offset);
        fill(self.bv.iter_mut(), &params, &mut offset);
        fill(self.wa.iter_mut(), &params, &mut offset);
        fill(self.ba.iter_mut(), &params, &mut offset);
        self.cache = None;
        Ok(())
    }

    fn advance_frames(&mut self, frames: usize) {
        self.frames += frames;
    }
}
