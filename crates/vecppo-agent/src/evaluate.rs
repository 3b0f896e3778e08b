//! Deterministic evaluation on a separate environment

use ndarray::Array2;
use rand::RngCore;
use tracing::debug;

use vecppo_core::{ActorCritic, Environment, PpoError, Result};
use vecppo_env::BoxedEnv;

use crate::ppo::PPOConfig;
use crate::state_stack::StateStack;
use crate::utils::ObservationFilter;

/// Number of consecutive updates tested in every test window
pub const TEST_WINDOW: usize = 5;

/// Runs noise-free episodes with its own state stack
pub struct Evaluator {
    env: BoxedEnv,
    stack: StateStack,
    num_test: usize,
    max_test_length: usize,
}

impl Evaluator {
    /// Evaluator over `env` with `num_stack` stacked frames
    pub fn new(env: BoxedEnv, num_stack: usize, num_test: usize, max_test_length: usize) -> Result<Self> {
        if num_test == 0 || max_test_length == 0 {
            return Err(PpoError::InvalidConfig(
                "num_test and max_test_length must be positive".into(),
            ));
        }
        let stack = StateStack::new(1, num_stack, env.observation_dim())?;
        Ok(Self {
            env,
            stack,
            num_test,
            max_test_length,
        })
    }

    /// Whether update `update` falls in a test window.
    ///
    /// Tests run on the first [`TEST_WINDOW`] updates of every
    /// `test_interval`, once past `test_thresh` frames.
    #[must_use]
    pub fn should_test(update: usize, config: &PPOConfig) -> bool {
        if config.no_test || config.test_interval == 0 {
            return false;
        }
        let thresh = if config.base.batch_len() == 0 {
            0
        } else {
            config.test_thresh / config.base.num_steps / config.base.num_processes
        };
        update % config.test_interval < TEST_WINDOW && update > thresh
    }

    /// Average undiscounted reward over `num_test` deterministic episodes
    pub async fn run<P, R>(
        &mut self,
        policy: &P,
        filter: Option<&ObservationFilter>,
        rng: &mut R,
    ) -> Result<f32>
    where
        P: ActorCritic + ?Sized,
        R: RngCore,
    {
        let mut total = 0.0f32;
        for episode in 0..self.num_test {
            let reward = self.episode(policy, filter, rng).await?;
            debug!(episode, reward, "test episode");
            total += reward;
        }
        Ok(total / self.num_test as f32)
    }

    async fn episode<P, R>(
        &mut self,
        policy: &P,
        filter: Option<&ObservationFilter>,
        rng: &mut R,
    ) -> Result<f32>
    where
        P: ActorCritic + ?Sized,
        R: RngCore,
    {
        self.stack.reset();
        let (obs, _) = self.env.reset().await?;
        self.push(obs, filter)?;

        let mut total = 0.0f32;
        for _ in 0..self.max_test_length {
            let sample = policy.sample(self.stack.flatten().view(), rng, true)?;
            let action = sample.actions.row(0).to_vec();
            let step = self.env.step(&action).await?;
            total += step.reward;
            if step.done || step.truncated {
                break;
            }
            self.push(step.observation, filter)?;
        }
        Ok(total)
    }

    fn push(&mut self, obs: Vec<f32>, filter: Option<&ObservationFilter>) -> Result<()> {
        let dim = obs.len();
        let obs = Array2::from_shape_vec((1, dim), obs)
            .map_err(|e| PpoError::Environment(e.to_string()))?;
        match filter {
            Some(filter) => self.stack.update(filter.apply(obs.view()).view()),
            None => self.stack.update(obs.view()),
        }
    }
}
