//! Environment registry for creating environments by name

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use vecppo_core::{Environment, EnvironmentConfig, PpoError, Result};

use crate::reacher::{ReacherConfig, ReacherEnv};
use crate::wrappers::TimeLimit;

/// Boxed environment as produced by the registry
pub type BoxedEnv = Box<dyn Environment>;

type EnvConstructor = Box<dyn Fn(EnvironmentConfig) -> Result<BoxedEnv> + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGISTRY: Arc<Mutex<EnvRegistry>> = Arc::new(Mutex::new(EnvRegistry::with_defaults()));
}

/// Global environment registry
pub struct EnvRegistry {
    /// Registered environments
    envs: HashMap<String, EnvConstructor>,
}

impl EnvRegistry {
    /// Create an empty registry
    fn new() -> Self {
        Self {
            envs: HashMap::new(),
        }
    }

    /// Registry holding the reacher presets
    fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (name, joints) in [("Reacher2DoF", 2), ("Reacher3DoF", 3), ("Reacher6DoF", 6)] {
            registry.register(name, move |config| make_reacher(joints, &config));
        }
        registry
    }

    /// Register an environment
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(EnvironmentConfig) -> Result<BoxedEnv> + Send + Sync + 'static,
    {
        self.envs.insert(name.into(), Box::new(constructor));
    }

    /// Create an environment by name
    pub fn make(&self, name: &str, config: EnvironmentConfig) -> Result<BoxedEnv> {
        self.envs
            .get(name)
            .ok_or_else(|| PpoError::Environment(format!("Unknown environment: {name}")))
            .and_then(|constructor| constructor(config))
    }

    /// List registered environments
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.envs.keys().cloned().collect();
        names.sort();
        names
    }
}

fn make_reacher(joints: usize, config: &EnvironmentConfig) -> Result<BoxedEnv> {
    let env = ReacherEnv::from_config(ReacherConfig::dof(joints), config)?;
    Ok(match config.max_steps {
        Some(max_steps) => Box::new(TimeLimit::new(env, max_steps)),
        None => Box::new(env),
    })
}

/// Register an environment globally
pub fn register_env<F>(name: impl Into<String>, constructor: F)
where
    F: Fn(EnvironmentConfig) -> Result<BoxedEnv> + Send + Sync + 'static,
{
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, constructor);
}

/// Create an environment by name
pub fn make_env(name: &str, config: EnvironmentConfig) -> Result<BoxedEnv> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .make(name, config)
}

/// List all registered environments
pub fn list_envs() -> Vec<String> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner).list()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_registered() {
        let names = list_envs();
        for preset in ["Reacher2DoF", "Reacher3DoF", "Reacher6DoF"] {
            assert!(names.iter().any(|n| n == preset), "{preset} missing");
        }
    }

    #[test]
    fn test_make_env_dimensions() {
        let env = make_env("Reacher6DoF", EnvironmentConfig::default()).unwrap();
        assert_eq!(env.action_dim(), 6);
        assert_eq!(env.observation_dim(), 20);
    }

    #[test]
    fn test_unknown_env() {
        let err = make_env("Humanoid", EnvironmentConfig::default()).err().unwrap();
        assert!(err.to_string().contains("Unknown environment"));
    }

    #[tokio::test]
    async fn test_max_steps_adds_time_limit() {
        let config = EnvironmentConfig {
            max_steps: Some(1),
            ..EnvironmentConfig::default()
        };
        let mut env = make_env("Reacher2DoF", config).unwrap();
        env.reset().await.unwrap();
        let step = env.step(&[0.0, 0.0]).await.unwrap();
        assert!(step.done && step.truncated);
    }
}
