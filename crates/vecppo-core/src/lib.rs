//! Core traits and types for vectorized PPO training
//!
//! This crate provides the abstractions the PPO core depends on: the
//! environment and policy capabilities, transition records, the base
//! rollout configuration and the shared error type.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod agent;
pub mod environment;
pub mod error;
pub mod policy;
pub mod trajectory;

// Re-export core traits and types
pub use agent::AgentConfig;
pub use environment::{Environment, EnvironmentConfig, Episode, Step, StepInfo, TrackedEnvironment};
pub use error::{PpoError, Result};
pub use policy::{ActionEvaluation, ActionSample, ActorCritic, OutputGradients};
pub use trajectory::{Transition, TransitionBatch};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ActorCritic, AgentConfig, Environment, PpoError, Result, Step, StepInfo, TransitionBatch,
    };
}
