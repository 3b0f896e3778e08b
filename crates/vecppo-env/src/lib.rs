//! Continuous-control environments for vecppo
//!
//! This crate provides:
//! - A vectorized session running one environment replica per tokio task
//! - Planar n-link reacher environments
//! - Wrappers and a name-based registry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod reacher;
pub mod registry;
pub mod vec_env;
pub mod wrappers;

pub use reacher::{ReacherConfig, ReacherEnv};
pub use registry::{list_envs, make_env, register_env, BoxedEnv, EnvRegistry};
pub use vec_env::{BatchStep, VecEnvSession};
pub use wrappers::TimeLimit;

// Re-export core types
pub use vecppo_core::{Environment, EnvironmentConfig, Episode, Step, StepInfo};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_env, ReacherEnv, TimeLimit, VecEnvSession};
    pub use vecppo_core::prelude::*;
}
