//! Policy capability consumed by the PPO core
//!
//! The trainer never looks inside the function approximator. It only needs a
//! stochastic forward pass for collection, a re-evaluation of stored actions
//! under the current parameters, and a way to turn loss gradients with respect
//! to those outputs into a flat parameter gradient.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::RngCore;

/// Output of a sampling forward pass over a batch of stacked states
#[derive(Debug, Clone)]
pub struct ActionSample {
    /// Value estimates, one per row
    pub values: Array1<f32>,
    /// Sampled (or mean, when deterministic) actions
    pub actions: Array2<f32>,
    /// Log-probability of each action under the current policy
    pub log_probs: Array1<f32>,
    /// Mean action standard deviation, for reporting
    pub action_std: f32,
}

/// Output of re-evaluating stored actions under the current parameters
#[derive(Debug, Clone)]
pub struct ActionEvaluation {
    /// Value estimates, one per row
    pub values: Array1<f32>,
    /// Log-probability of each stored action
    pub log_probs: Array1<f32>,
    /// Mean policy entropy over the batch
    pub entropy: f32,
}

/// Gradient of the scalar loss with respect to the last evaluation's outputs
#[derive(Debug, Clone)]
pub struct OutputGradients {
    /// dL / d value, per row
    pub values: Array1<f32>,
    /// dL / d log_prob, per row
    pub log_probs: Array1<f32>,
    /// dL / d entropy
    pub entropy: f32,
}

/// Diagonal-Gaussian actor-critic capability
pub trait ActorCritic: Send {
    /// Length of the stacked state vector the policy consumes
    fn state_dim(&self) -> usize;

    /// Length of the action vector the policy produces
    fn action_dim(&self) -> usize;

    /// Stochastic forward pass; `deterministic` drops the sampling noise
    fn sample(
        &self,
        states: ArrayView2<'_, f32>,
        rng: &mut dyn RngCore,
        deterministic: bool,
    ) -> crate::Result<ActionSample>;

    /// Value head only
    fn value(&self, states: ArrayView2<'_, f32>) -> crate::Result<Array1<f32>>;

    /// Recompute values, log-probabilities and entropy for stored actions.
    ///
    /// Implementations keep whatever intermediate state [`ActorCritic::backward`]
    /// needs for this batch.
    fn evaluate_actions(
        &mut self,
        states: ArrayView2<'_, f32>,
        actions: ArrayView2<'_, f32>,
    ) -> crate::Result<ActionEvaluation>;

    /// Back-propagate output gradients of the last `evaluate_actions` call into
    /// a flat gradient laid out like [`ActorCritic::parameters`]
    fn backward(&mut self, grads: &OutputGradients) -> crate::Result<Array1<f32>>;

    /// Flat copy of every trainable parameter
    fn parameters(&self) -> Array1<f32>;

    /// Overwrite every trainable parameter from a flat vector
    fn set_parameters(&mut self, params: ArrayView1<'_, f32>) -> crate::Result<()>;

    /// Notify the policy that `frames` more environment frames were collected
    fn advance_frames(&mut self, _frames: usize) {}
}
