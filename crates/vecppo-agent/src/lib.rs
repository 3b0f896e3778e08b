//! PPO training over vectorized continuous-control environments
//!
//! This crate provides the pieces of the on-policy loop:
//! - Rollout storage, frame stacking and minibatch sampling
//! - GAE and discounted return estimation
//! - A Gaussian MLP actor-critic with an annealed log-std
//! - The clipped-surrogate update with Adam and gradient clipping
//! - The training loop, evaluation and checkpointing

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod advantage;
pub mod buffer;
pub mod evaluate;
pub mod optim;
pub mod policy;
pub mod ppo;
pub mod report;
pub mod sampler;
pub mod state_stack;
pub mod stats;
pub mod trainer;
pub mod utils;

// Re-export the training loop
pub use ppo::{PPOConfig, PpoLosses, PpoUpdate};
pub use trainer::{Phase, StopHandle, Trainer, TrainingContext};

// Re-export rollout components
pub use advantage::{normalize_advantages, AdvantageEstimator, ReturnMode};
pub use buffer::RolloutBuffer;
pub use sampler::{Minibatch, MinibatchSampler};
pub use state_stack::StateStack;

// Re-export policy and optimizer
pub use optim::{clip_grad_norm, Adam, AdamConfig};
pub use policy::{MlpConfig, MlpGaussianPolicy};

// Re-export reporting
pub use evaluate::Evaluator;
pub use report::{
    Checkpoint, CheckpointSink, CycleMetrics, JsonCheckpointer, MemoryCheckpointer, MemoryReporter,
    Reporter, TracingReporter,
};
pub use stats::{EpisodeAccumulator, LossWindow};
pub use utils::{LinearSchedule, ObservationFilter, RunningMeanStd, Schedule};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Evaluator, JsonCheckpointer, MlpGaussianPolicy, PPOConfig, RolloutBuffer, TracingReporter,
        Trainer, TrainingContext,
    };
    pub use vecppo_core::prelude::*;
    pub use vecppo_env::VecEnvSession;
}
