//! Environment traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step {
    /// Raw observation after the step
    pub observation: Vec<f32>,
    /// Reward signal
    pub reward: f32,
    /// Whether the episode is done
    pub done: bool,
    /// Whether the episode was truncated (e.g., time limit)
    pub truncated: bool,
    /// Additional info from the environment
    pub info: StepInfo,
}

/// Additional information from a step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInfo {
    /// Summary of the episode that ended on this step, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<Episode>,
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Episode information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode ID
    pub id: String,
    /// Total reward
    pub total_reward: f64,
    /// Number of steps
    pub steps: usize,
    /// Whether episode was truncated
    pub truncated: bool,
    /// Start time
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// End time
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Configuration for environments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Random seed
    pub seed: Option<u64>,
    /// Maximum episode steps
    pub max_steps: Option<usize>,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl EnvironmentConfig {
    /// Read a float parameter, falling back to `default`
    #[must_use]
    pub fn param_f32(&self, key: &str, default: f32) -> f32 {
        self.params
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .map_or(default, |v| v as f32)
    }
}

/// Core environment trait for a single continuous-control replica
#[async_trait]
pub trait Environment: Send {
    /// Length of the raw observation vector
    fn observation_dim(&self) -> usize;

    /// Length of the action vector
    fn action_dim(&self) -> usize;

    /// Reset the environment
    async fn reset(&mut self) -> crate::Result<(Vec<f32>, StepInfo)>;

    /// Take a step in the environment
    async fn step(&mut self, action: &[f32]) -> crate::Result<Step>;

    /// Reseed the environment's random source
    fn seed(&mut self, _seed: u64) {}

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Get current episode info
    fn episode_info(&self) -> Option<Episode> {
        None
    }
}

#[async_trait]
impl<E> Environment for Box<E>
where
    E: Environment + ?Sized,
{
    fn observation_dim(&self) -> usize {
        (**self).observation_dim()
    }

    fn action_dim(&self) -> usize {
        (**self).action_dim()
    }

    async fn reset(&mut self) -> crate::Result<(Vec<f32>, StepInfo)> {
        (**self).reset().await
    }

    async fn step(&mut self, action: &[f32]) -> crate::Result<Step> {
        (**self).step(action).await
    }

    fn seed(&mut self, seed: u64) {
        (**self).seed(seed);
    }

    async fn close(&mut self) -> crate::Result<()> {
        (**self).close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        (**self).episode_info()
    }
}

/// Wrapper for environments that tracks episodes.
///
/// When an episode ends the finished [`Episode`] is attached to the step's
/// [`StepInfo`], so consumers downstream of a worker pool can report it.
pub struct TrackedEnvironment<E> {
    /// Inner environment
    pub env: E,
    /// Current episode
    pub episode: Option<Episode>,
    /// Step counter
    pub step_count: usize,
}

impl<E> TrackedEnvironment<E> {
    /// Create a new tracked environment
    pub fn new(env: E) -> Self {
        Self {
            env,
            episode: None,
            step_count: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TrackedEnvironment<E>
where
    E: Environment,
{
    fn observation_dim(&self) -> usize {
        self.env.observation_dim()
    }

    fn action_dim(&self) -> usize {
        self.env.action_dim()
    }

    async fn reset(&mut self) -> crate::Result<(Vec<f32>, StepInfo)> {
        self.episode = Some(Episode {
            id: uuid::Uuid::new_v4().to_string(),
            total_reward: 0.0,
            steps: 0,
            truncated: false,
            start_time: chrono::Utc::now(),
            end_time: None,
        });
        self.step_count = 0;

        self.env.reset().await
    }

    async fn step(&mut self, action: &[f32]) -> crate::Result<Step> {
        let mut step = self.env.step(action).await?;

        self.step_count += 1;
        if let Some(ref mut episode) = self.episode {
            episode.total_reward += f64::from(step.reward);
            episode.steps = self.step_count;

            if step.done || step.truncated {
                episode.truncated = step.truncated;
                episode.end_time = Some(chrono::Utc::now());
                step.info.episode = Some(episode.clone());
            }
        }

        Ok(step)
    }

    fn seed(&mut self, seed: u64) {
        self.env.seed(seed);
    }

    async fn close(&mut self) -> crate::Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.episode.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts steps and ends every third one
    struct Countdown {
        t: usize,
    }

    #[async_trait]
    impl Environment for Countdown {
        fn observation_dim(&self) -> usize {
            1
        }

        fn action_dim(&self) -> usize {
            1
        }

        async fn reset(&mut self) -> crate::Result<(Vec<f32>, StepInfo)> {
            self.t = 0;
            Ok((vec![0.0], StepInfo::default()))
        }

        async fn step(&mut self, action: &[f32]) -> crate::Result<Step> {
            self.t += 1;
            Ok(Step {
                observation: vec![self.t as f32],
                reward: action[0],
                done: self.t == 3,
                truncated: false,
                info: StepInfo::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_tracked_environment_reports_finished_episode() {
        let mut env = TrackedEnvironment::new(Countdown { t: 0 });
        env.reset().await.unwrap();

        let first = env.step(&[0.5]).await.unwrap();
        assert!(first.info.episode.is_none());
        env.step(&[0.5]).await.unwrap();
        let last = env.step(&[1.0]).await.unwrap();

        let episode = last.info.episode.expect("episode summary on done");
        assert_eq!(episode.steps, 3);
        assert!((episode.total_reward - 2.0).abs() < 1e-9);
        assert!(episode.end_time.is_some());
    }

    #[test]
    fn test_config_param_lookup() {
        let config: EnvironmentConfig =
            serde_json::from_str(r#"{"seed": 3, "electricity_cost": -0.2}"#).unwrap();
        assert_eq!(config.seed, Some(3));
        approx::assert_relative_eq!(config.param_f32("electricity_cost", 0.0), -0.2);
        approx::assert_relative_eq!(config.param_f32("missing", 1.5), 1.5);
    }
}
