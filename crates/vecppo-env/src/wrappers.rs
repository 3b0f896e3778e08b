//! Environment wrappers for common transformations

use async_trait::async_trait;

use vecppo_core::{Environment, Episode, Result, Step, StepInfo};

/// Time limit wrapper
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TimeLimit<E>
where
    E: Environment,
{
    fn observation_dim(&self) -> usize {
        self.env.observation_dim()
    }

    fn action_dim(&self) -> usize {
        self.env.action_dim()
    }

    async fn reset(&mut self) -> Result<(Vec<f32>, StepInfo)> {
        self.steps = 0;
        self.env.reset().await
    }

    async fn step(&mut self, action: &[f32]) -> Result<Step> {
        self.steps += 1;
        let mut step = self.env.step(action).await?;

        if self.steps >= self.max_steps && !step.done {
            step.truncated = true;
            step.done = true;
        }

        Ok(step)
    }

    fn seed(&mut self, seed: u64) {
        self.env.seed(seed);
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}
