//! Fixed-horizon rollout storage replicated over `N` environments
//!
//! State, value, return and mask arrays carry `T+1` slots. Slot 0 holds the
//! carry-over from the previous cycle and slot `T` the state the bootstrap
//! value is computed on. Action, log-prob and reward arrays carry `T` slots.

use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, ArrayView3};

use vecppo_core::{PpoError, Result, Transition, TransitionBatch};

/// On-policy rollout buffer
#[derive(Debug, Clone)]
pub struct RolloutBuffer {
    states: Array3<f32>,
    actions: Array3<f32>,
    log_probs: Array2<f32>,
    value_preds: Array2<f32>,
    rewards: Array2<f32>,
    masks: Array2<f32>,
    returns: Array2<f32>,
}

impl RolloutBuffer {
    /// Allocate a buffer for horizon `num_steps` over `num_envs` lanes
    pub fn new(num_steps: usize, num_envs: usize, state_dim: usize, action_dim: usize) -> Result<Self> {
        if num_steps == 0 || num_envs == 0 || state_dim == 0 || action_dim == 0 {
            return Err(PpoError::InvalidConfig(format!(
                "rollout buffer needs non-zero sizes, got T={num_steps} N={num_envs} \
                 state_dim={state_dim} action_dim={action_dim}"
            )));
        }
        Ok(Self {
            states: Array3::zeros((num_steps + 1, num_envs, state_dim)),
            actions: Array3::zeros((num_steps, num_envs, action_dim)),
            log_probs: Array2::zeros((num_steps, num_envs)),
            value_preds: Array2::zeros((num_steps + 1, num_envs)),
            rewards: Array2::zeros((num_steps, num_envs)),
            masks: Array2::ones((num_steps + 1, num_envs)),
            returns: Array2::zeros((num_steps + 1, num_envs)),
        })
    }

    /// Horizon `T`
    #[must_use]
    pub fn num_steps(&self) -> usize {
        self.actions.dim().0
    }

    /// Lanes `N`
    #[must_use]
    pub fn num_envs(&self) -> usize {
        self.actions.dim().1
    }

    /// Stacked state length
    #[must_use]
    pub fn state_dim(&self) -> usize {
        self.states.dim().2
    }

    /// Action length
    #[must_use]
    pub fn action_dim(&self) -> usize {
        self.actions.dim().2
    }

    /// Samples per cycle, `T * N`
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_steps() * self.num_envs()
    }

    /// Always false once constructed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed slot 0 with the stacked reset states
    pub fn set_first_state(&mut self, states: ArrayView2<'_, f32>) -> Result<()> {
        self.check_rows("first state", states)?;
        self.states.slice_mut(s![0, .., ..]).assign(&states);
        self.masks.row_mut(0).fill(1.0);
        Ok(())
    }

    /// Record one collection step.
    ///
    /// The post-step state and mask go to slot `step + 1`; the action, its
    /// log-prob, the pre-step value and the reward go to slot `step`.
    pub fn insert(&mut self, step: usize, batch: &TransitionBatch) -> Result<()> {
        let t = self.num_steps();
        if step >= t {
            return Err(PpoError::InvalidConfig(format!(
                "insert at step {step} outside horizon {t}"
            )));
        }
        let n = self.num_envs();
        self.check_rows("transition states", batch.states.view())?;
        if batch.actions.dim() != (n, self.action_dim()) {
            return Err(PpoError::dims(
                "transition actions",
                n * self.action_dim(),
                batch.actions.len(),
            ));
        }
        for (name, len) in [
            ("transition log_probs", batch.log_probs.len()),
            ("transition values", batch.values.len()),
            ("transition rewards", batch.rewards.len()),
            ("transition masks", batch.masks.len()),
        ] {
            if len != n {
                return Err(PpoError::dims(name, n, len));
            }
        }

        self.states.slice_mut(s![step + 1, .., ..]).assign(&batch.states);
        self.masks.row_mut(step + 1).assign(&batch.masks);
        self.actions.slice_mut(s![step, .., ..]).assign(&batch.actions);
        self.log_probs.row_mut(step).assign(&batch.log_probs);
        self.value_preds.row_mut(step).assign(&batch.values);
        self.rewards.row_mut(step).assign(&batch.rewards);
        Ok(())
    }

    /// Carry slot `T` over into slot 0 for the next cycle
    pub fn rotate(&mut self) {
        let t = self.num_steps();
        let last_states = self.states.slice(s![t, .., ..]).to_owned();
        self.states.slice_mut(s![0, .., ..]).assign(&last_states);
        let last_masks = self.masks.row(t).to_owned();
        self.masks.row_mut(0).assign(&last_masks);
    }

    /// States in slot `T`, `(N, state_dim)`
    #[must_use]
    pub fn last_state(&self) -> ArrayView2<'_, f32> {
        self.states.slice(s![self.num_steps(), .., ..])
    }

    /// Write the bootstrap value into slot `T` of the value array
    pub fn set_bootstrap_value(&mut self, values: ArrayView1<'_, f32>) -> Result<()> {
        let n = self.num_envs();
        if values.len() != n {
            return Err(PpoError::dims("bootstrap value", n, values.len()));
        }
        let t = self.num_steps();
        self.value_preds.row_mut(t).assign(&values);
        Ok(())
    }

    /// Transition stored for `(step, env)`: the state reached after the step
    #[must_use]
    pub fn transition(&self, step: usize, env: usize) -> Option<Transition> {
        if step >= self.num_steps() || env >= self.num_envs() {
            return None;
        }
        Some(Transition {
            state: self.states.slice(s![step + 1, env, ..]).to_vec(),
            action: self.actions.slice(s![step, env, ..]).to_vec(),
            log_prob: self.log_probs[[step, env]],
            value: self.value_preds[[step, env]],
            reward: self.rewards[[step, env]],
            mask: self.masks[[step + 1, env]],
        })
    }

    /// `(T+1, N, state_dim)` states
    #[must_use]
    pub fn states(&self) -> ArrayView3<'_, f32> {
        self.states.view()
    }

    /// `(T, N, action_dim)` actions
    #[must_use]
    pub fn actions(&self) -> ArrayView3<'_, f32> {
        self.actions.view()
    }

    /// `(T, N)` action log-probs at collection time
    #[must_use]
    pub fn log_probs(&self) -> ArrayView2<'_, f32> {
        self.log_probs.view()
    }

    /// `(T+1, N)` value estimates
    #[must_use]
    pub fn value_preds(&self) -> ArrayView2<'_, f32> {
        self.value_preds.view()
    }

    /// `(T, N)` rewards
    #[must_use]
    pub fn rewards(&self) -> ArrayView2<'_, f32> {
        self.rewards.view()
    }

    /// `(T+1, N)` continuation masks
    #[must_use]
    pub fn masks(&self) -> ArrayView2<'_, f32> {
        self.masks.view()
    }

    /// `(T+1, N)` return targets of the last advantage computation
    #[must_use]
    pub fn returns(&self) -> ArrayView2<'_, f32> {
        self.returns.view()
    }

    pub(crate) fn returns_mut(&mut self) -> &mut Array2<f32> {
        &mut self.returns
    }

    fn check_rows(&self, context: &'static str, states: ArrayView2<'_, f32>) -> Result<()> {
        let expected = (self.num_envs(), self.state_dim());
        if states.dim() != expected {
            return Err(PpoError::dims(context, expected.0 * expected.1, states.len()));
        }
        Ok(())
    }
}
