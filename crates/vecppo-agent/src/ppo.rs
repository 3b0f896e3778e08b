//! Proximal Policy Optimization: configuration and the clipped-objective update
//!
//! Every term is a loss to be minimized:
//! `L = −mean(min(r·A, clip(r, 1−ε, 1+ε)·A)) + c_v·mean((v − R)²) − c_e·H`.

use std::ops::AddAssign;
use std::path::Path;

use ndarray::{Array1, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use vecppo_core::{ActionEvaluation, ActorCritic, AgentConfig, OutputGradients, PpoError, Result};

use crate::advantage::ReturnMode;
use crate::buffer::RolloutBuffer;
use crate::optim::{clip_grad_norm, Adam, AdamConfig};
use crate::policy::MlpConfig;
use crate::sampler::{Minibatch, MinibatchSampler};

/// Stabilizer added to the return standard deviation
const RETURN_EPS: f32 = 1e-5;

/// PPO-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PPOConfig {
    /// Base agent configuration
    #[serde(flatten)]
    pub base: AgentConfig,
    /// Clipping parameter ε
    pub clip_param: f64,
    /// Optimization passes over each rollout
    pub ppo_epoch: usize,
    /// Minibatch size
    pub batch_size: usize,
    /// Value loss coefficient
    pub value_loss_coef: f64,
    /// Entropy coefficient
    pub entropy_coef: f64,
    /// Maximum global gradient norm
    pub max_grad_norm: f64,
    /// GAE λ
    pub tau: f64,
    /// Use Generalized Advantage Estimation
    pub use_gae: bool,
    /// Standardize advantages once per cycle
    pub normalize_advantages: bool,
    /// Standardize return targets per minibatch
    pub normalize_returns: bool,
    /// Run raw observations through a running normalizer
    pub normalize_observations: bool,
    /// Hidden layer width of the MLP policy
    pub hidden: usize,
    /// Initial log-std of the action distribution
    pub std_start: f32,
    /// Final log-std of the action distribution
    pub std_stop: f32,
    /// Report to the console every `log_interval` updates
    pub log_interval: usize,
    /// Test window period in updates
    pub test_interval: usize,
    /// Episodes per evaluation
    pub num_test: usize,
    /// Step cap per evaluation episode
    pub max_test_length: usize,
    /// Frames before evaluation starts
    pub test_thresh: usize,
    /// Skip evaluation entirely
    pub no_test: bool,
}

impl Default for PPOConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig::default(),
            clip_param: 0.2,
            ppo_epoch: 4,
            batch_size: 64,
            value_loss_coef: 1.0,
            entropy_coef: 0.0,
            max_grad_norm: 0.5,
            tau: 0.95,
            use_gae: true,
            normalize_advantages: true,
            normalize_returns: false,
            normalize_observations: true,
            hidden: 64,
            std_start: -0.6,
            std_stop: -1.7,
            log_interval: 1,
            test_interval: 50,
            num_test: 50,
            max_test_length: 1000,
            test_thresh: 0,
            no_test: false,
        }
    }
}

impl PPOConfig {
    /// Parse from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject configurations the trainer cannot run
    pub fn validate(&self) -> Result<()> {
        let base = &self.base;
        let invalid = |msg: String| Err(PpoError::InvalidConfig(msg));

        if base.num_steps == 0 || base.num_processes == 0 || base.num_stack == 0 {
            return invalid(format!(
                "num_steps, num_processes and num_stack must be positive (got {}, {}, {})",
                base.num_steps, base.num_processes, base.num_stack
            ));
        }
        if self.ppo_epoch == 0 || self.batch_size == 0 || self.hidden == 0 || self.log_interval == 0 {
            return invalid("ppo_epoch, batch_size, hidden and log_interval must be positive".into());
        }
        if self.batch_size > base.batch_len() {
            return invalid(format!(
                "batch_size {} exceeds the {} samples of one rollout",
                self.batch_size,
                base.batch_len()
            ));
        }
        if !(0.0..=1.0).contains(&base.gamma) {
            return invalid(format!("gamma {} outside [0, 1]", base.gamma));
        }
        if !(0.0..=1.0).contains(&self.tau) {
            return invalid(format!("tau {} outside [0, 1]", self.tau));
        }
        if !(self.clip_param > 0.0 && self.clip_param < 1.0) {
            return invalid(format!("clip_param {} outside (0, 1)", self.clip_param));
        }
        if base.learning_rate <= 0.0 || self.max_grad_norm <= 0.0 {
            return invalid("learning_rate and max_grad_norm must be positive".into());
        }
        if !self.no_test && (self.test_interval == 0 || self.num_test == 0 || self.max_test_length == 0) {
            return invalid("test_interval, num_test and max_test_length must be positive".into());
        }
        Ok(())
    }

    /// Number of training cycles
    #[must_use]
    pub fn num_updates(&self) -> usize {
        self.base.num_updates()
    }

    /// Return estimation mode
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn return_mode(&self) -> ReturnMode {
        if self.use_gae {
            ReturnMode::Gae { tau: self.tau as f32 }
        } else {
            ReturnMode::Plain
        }
    }

    /// Optimizer settings
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn adam(&self) -> AdamConfig {
        AdamConfig {
            learning_rate: self.base.learning_rate as f32,
            ..AdamConfig::default()
        }
    }

    /// Policy network settings
    #[must_use]
    pub fn mlp(&self) -> MlpConfig {
        MlpConfig {
            hidden: self.hidden,
            std_start: self.std_start,
            std_stop: self.std_stop,
            total_frames: self.base.num_frames,
        }
    }
}

/// Loss terms of one update, or their per-cycle aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PpoLosses {
    /// Mean squared value error
    pub value_loss: f32,
    /// Clipped surrogate loss
    pub policy_loss: f32,
    /// Mean policy entropy
    pub entropy: f32,
}

impl AddAssign for PpoLosses {
    fn add_assign(&mut self, rhs: Self) {
        self.value_loss += rhs.value_loss;
        self.policy_loss += rhs.policy_loss;
        self.entropy += rhs.entropy;
    }
}

impl PpoLosses {
    /// Divide every term by `divisor`
    #[must_use]
    pub fn scaled(self, divisor: f32) -> Self {
        Self {
            value_loss: self.value_loss / divisor,
            policy_loss: self.policy_loss / divisor,
            entropy: self.entropy / divisor,
        }
    }
}

/// Clipped-objective update step with its optimizer state
#[derive(Debug, Clone)]
pub struct PpoUpdate {
    clip_param: f32,
    value_loss_coef: f32,
    entropy_coef: f32,
    max_grad_norm: f32,
    normalize_returns: bool,
    optimizer: Adam,
}

impl PpoUpdate {
    /// Create the update step for a policy with `num_params` parameters
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(config: &PPOConfig, num_params: usize) -> Self {
        Self {
            clip_param: config.clip_param as f32,
            value_loss_coef: config.value_loss_coef as f32,
            entropy_coef: config.entropy_coef as f32,
            max_grad_norm: config.max_grad_norm as f32,
            normalize_returns: config.normalize_returns,
            optimizer: Adam::new(config.adam(), num_params),
        }
    }

    /// Loss terms and their gradients with respect to the policy outputs
    pub fn loss_gradients(
        &self,
        eval: &ActionEvaluation,
        batch: &Minibatch,
    ) -> Result<(PpoLosses, OutputGradients)> {
        let b = batch.len();
        if b == 0 {
            return Err(PpoError::InvalidConfig("empty minibatch".into()));
        }
        if eval.values.len() != b || eval.log_probs.len() != b {
            return Err(PpoError::dims(
                "evaluated minibatch",
                b,
                eval.values.len().min(eval.log_probs.len()),
            ));
        }
        let bf = b as f32;

        let returns = if self.normalize_returns && b > 1 {
            let mean = batch.returns.sum() / bf;
            let std = batch.returns.std(1.0);
            batch.returns.mapv(|r| (r - mean) / (std + RETURN_EPS))
        } else {
            batch.returns.clone()
        };

        let (lo, hi) = (1.0 - self.clip_param, 1.0 + self.clip_param);
        let mut policy_loss = 0.0f32;
        let mut d_log_probs = Array1::zeros(b);
        for i in 0..b {
            let ratio = (eval.log_probs[i] - batch.old_log_probs[i]).exp();
            let adv = batch.advantages[i];
            let surr1 = ratio * adv;
            let surr2 = ratio.clamp(lo, hi) * adv;
            policy_loss -= surr1.min(surr2);
            // Only the unclipped branch carries gradient to the ratio.
            let d_ratio = if surr1 <= surr2 { -adv / bf } else { 0.0 };
            d_log_probs[i] = d_ratio * ratio;
        }
        policy_loss /= bf;

        let errors = &eval.values - &returns;
        let value_loss = errors.mapv(|e| e * e).sum() / bf;
        let d_values = errors.mapv(|e| self.value_loss_coef * 2.0 * e / bf);

        let total = policy_loss + self.value_loss_coef * value_loss - self.entropy_coef * eval.entropy;
        if !total.is_finite() {
            return Err(PpoError::NumericalDegeneracy(format!(
                "non-finite loss (policy {policy_loss}, value {value_loss}, entropy {})",
                eval.entropy
            )));
        }

        Ok((
            PpoLosses {
                value_loss,
                policy_loss,
                entropy: eval.entropy,
            },
            OutputGradients {
                values: d_values,
                log_probs: d_log_probs,
                entropy: -self.entropy_coef,
            },
        ))
    }

    /// One gradient step on `batch`
    pub fn step<P>(&mut self, policy: &mut P, batch: &Minibatch) -> Result<PpoLosses>
    where
        P: ActorCritic + ?Sized,
    {
        let eval = policy.evaluate_actions(batch.states.view(), batch.actions.view())?;
        let (losses, output_grads) = self.loss_gradients(&eval, batch)?;

        let mut grads = policy.backward(&output_grads)?;
        if grads.iter().any(|g| !g.is_finite()) {
            return Err(PpoError::NumericalDegeneracy("non-finite gradient".into()));
        }
        let norm = clip_grad_norm(&mut grads, self.max_grad_norm);

        let mut params = policy.parameters();
        self.optimizer.step(&mut params, grads.view())?;
        policy.set_parameters(params.view())?;

        debug!(
            grad_norm = norm,
            value_loss = losses.value_loss,
            policy_loss = losses.policy_loss,
            "minibatch update"
        );
        Ok(losses)
    }

    /// `epochs` shuffled passes over the rollout; loss sums divided by `epochs`
    pub fn optimize<P, R>(
        &mut self,
        policy: &mut P,
        buffer: &RolloutBuffer,
        advantages: ArrayView2<'_, f32>,
        sampler: &MinibatchSampler,
        epochs: usize,
        rng: &mut R,
    ) -> Result<PpoLosses>
    where
        P: ActorCritic + ?Sized,
        R: Rng + ?Sized,
    {
        let mut total = PpoLosses::default();
        for _ in 0..epochs {
            for batch in sampler.epoch(buffer, advantages, rng)? {
                total += self.step(policy, &batch)?;
            }
        }
        Ok(total.scaled(epochs.max(1) as f32))
    }

    /// Optimizer steps taken so far
    #[must_use]
    pub fn steps(&self) -> i32 {
        self.optimizer.steps()
    }
}
