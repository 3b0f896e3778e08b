//! Base rollout configuration shared by agents and the trainer

use serde::{Deserialize, Serialize};

/// Sizes and schedule of the on-policy rollout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate of the policy optimizer
    pub learning_rate: f64,
    /// Discount factor
    pub gamma: f64,
    /// Rollout horizon `T` per training cycle
    pub num_steps: usize,
    /// Number of parallel environments `N`
    pub num_processes: usize,
    /// Number of raw observations stacked into one state `K`
    pub num_stack: usize,
    /// Total environment frames to train for
    pub num_frames: usize,
    /// Random seed for environments, sampling noise and shuffles
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            num_steps: 2048,
            num_processes: 4,
            num_stack: 1,
            num_frames: 1_000_000,
            seed: 10,
        }
    }
}

impl AgentConfig {
    /// Number of training cycles: `num_frames / num_steps / num_processes`
    #[must_use]
    pub fn num_updates(&self) -> usize {
        if self.num_steps == 0 || self.num_processes == 0 {
            return 0;
        }
        self.num_frames / self.num_steps / self.num_processes
    }

    /// Samples gathered per cycle, `T * N`
    #[must_use]
    pub fn batch_len(&self) -> usize {
        self.num_steps * self.num_processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_updates_uses_integer_division() {
        let config = AgentConfig {
            num_frames: 10_000,
            num_steps: 128,
            num_processes: 4,
            ..AgentConfig::default()
        };
        assert_eq!(config.num_updates(), 19);
        assert_eq!(config.batch_len(), 512);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"num_steps": 16}"#).unwrap();
        assert_eq!(config.num_steps, 16);
        assert_eq!(config.num_processes, 4);
        assert!((config.gamma - 0.99).abs() < 1e-12);
    }
}
