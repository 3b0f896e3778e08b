//! Transition records written by the collection phase

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Single transition of one environment lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Stacked state reached after the step
    pub state: Vec<f32>,
    /// Action taken
    pub action: Vec<f32>,
    /// Log-probability of the action when it was sampled
    pub log_prob: f32,
    /// Value estimate of the state the action was taken in
    pub value: f32,
    /// Reward received
    pub reward: f32,
    /// 1.0 while the episode continues, 0.0 when it just ended
    pub mask: f32,
}

/// One collection step across all `N` environment lanes
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    /// Stacked states after the step, `(N, state_dim)`
    pub states: Array2<f32>,
    /// Actions, `(N, action_dim)`
    pub actions: Array2<f32>,
    /// Action log-probabilities, `(N,)`
    pub log_probs: Array1<f32>,
    /// Value estimates of the pre-step states, `(N,)`
    pub values: Array1<f32>,
    /// Rewards, `(N,)`
    pub rewards: Array1<f32>,
    /// Continuation masks, `(N,)`
    pub masks: Array1<f32>,
}

impl TransitionBatch {
    /// Number of environment lanes in the batch
    #[must_use]
    pub fn num_envs(&self) -> usize {
        self.states.nrows()
    }

    /// Extract one lane as a [`Transition`]
    #[must_use]
    pub fn lane(&self, env: usize) -> Transition {
        Transition {
            state: self.states.row(env).to_vec(),
            action: self.actions.row(env).to_vec(),
            log_prob: self.log_probs[env],
            value: self.values[env],
            reward: self.rewards[env],
            mask: self.masks[env],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_lane_extraction() {
        let batch = TransitionBatch {
            states: arr2(&[[1.0, 2.0], [3.0, 4.0]]),
            actions: arr2(&[[0.1], [0.2]]),
            log_probs: arr1(&[-1.0, -2.0]),
            values: arr1(&[0.5, 0.6]),
            rewards: arr1(&[1.0, 0.0]),
            masks: arr1(&[1.0, 0.0]),
        };

        assert_eq!(batch.num_envs(), 2);
        let lane = batch.lane(1);
        assert_eq!(lane.state, vec![3.0, 4.0]);
        assert_eq!(lane.action, vec![0.2]);
        assert_eq!(lane.mask, 0.0);
        assert_eq!(lane.log_prob, -2.0);
    }
}
