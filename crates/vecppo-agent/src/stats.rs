//! Episode reward and loss bookkeeping for reporting

use std::collections::VecDeque;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use vecppo_core::{PpoError, Result};

use crate::ppo::PpoLosses;

/// Default number of finished episodes kept for the mean reward
pub const EPISODE_WINDOW: usize = 200;

/// Default number of cycle losses averaged for reporting
pub const LOSS_WINDOW: usize = 10;

/// Per-lane running undiscounted reward plus a window of finished totals
#[derive(Debug, Clone)]
pub struct EpisodeAccumulator {
    running: Array1<f32>,
    finished: VecDeque<f32>,
    capacity: usize,
    total_episodes: usize,
}

impl EpisodeAccumulator {
    /// Accumulator for `num_envs` lanes keeping the last `capacity` episodes
    #[must_use]
    pub fn new(num_envs: usize, capacity: usize) -> Self {
        Self {
            running: Array1::zeros(num_envs),
            finished: VecDeque::with_capacity(capacity),
            capacity,
            total_episodes: 0,
        }
    }

    /// Add one step of rewards to every lane
    pub fn accumulate(&mut self, rewards: ArrayView1<'_, f32>) -> Result<()> {
        if rewards.len() != self.running.len() {
            return Err(PpoError::dims("episode rewards", self.running.len(), rewards.len()));
        }
        self.running += &rewards;
        Ok(())
    }

    /// Roll the totals of lanes with `dones[i]` into the window and zero them
    pub fn finish(&mut self, dones: &[bool]) -> Result<usize> {
        if dones.len() != self.running.len() {
            return Err(PpoError::dims("episode dones", self.running.len(), dones.len()));
        }
        let mut count = 0;
        for (i, _) in dones.iter().enumerate().filter(|(_, &d)| d) {
            self.push(self.running[i]);
            self.running[i] = 0.0;
            count += 1;
        }
        Ok(count)
    }

    fn push(&mut self, total: f32) {
        if self.finished.len() == self.capacity {
            self.finished.pop_front();
        }
        if self.capacity > 0 {
            self.finished.push_back(total);
        }
        self.total_episodes += 1;
    }

    /// Mean over the window, `None` before any episode finished
    #[must_use]
    pub fn mean_reward(&self) -> Option<f32> {
        if self.finished.is_empty() {
            return None;
        }
        Some(self.finished.iter().sum::<f32>() / self.finished.len() as f32)
    }

    /// Running totals of the unfinished episodes
    #[must_use]
    pub fn running(&self) -> ArrayView1<'_, f32> {
        self.running.view()
    }

    /// Episodes finished since construction
    #[must_use]
    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }
}

/// Bounded window of per-cycle losses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LossWindow {
    losses: VecDeque<PpoLosses>,
    capacity: usize,
}

impl LossWindow {
    /// Window keeping the last `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            losses: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one cycle
    pub fn push(&mut self, losses: PpoLosses) {
        if self.losses.len() == self.capacity {
            self.losses.pop_front();
        }
        if self.capacity > 0 {
            self.losses.push_back(losses);
        }
    }

    /// Mean of the window
    #[must_use]
    pub fn mean(&self) -> PpoLosses {
        if self.losses.is_empty() {
            return PpoLosses::default();
        }
        let mut sum = PpoLosses::default();
        for &l in &self.losses {
            sum += l;
        }
        sum.scaled(self.losses.len() as f32)
    }

    /// Most recent entry
    #[must_use]
    pub fn last(&self) -> Option<PpoLosses> {
        self.losses.back().copied()
    }

    /// Number of entries held
    #[must_use]
    pub fn len(&self) -> usize {
        self.losses.len()
    }

    /// True when nothing was recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }
}
