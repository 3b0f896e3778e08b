//! Planar reacher: an n-link arm that must bring its fingertip to a target

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use vecppo_core::{Environment, EnvironmentConfig, PpoError, Result, Step, StepInfo};

/// Reacher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReacherConfig {
    /// Number of revolute joints
    pub joints: usize,
    /// Total arm length, split evenly over the links
    pub reach: f32,
    /// Integration step in seconds
    pub dt: f32,
    /// Episode length in seconds
    pub episode_time: f32,
    /// Torque gain applied to actions in [-1, 1]
    pub torque_gain: f32,
    /// Viscous joint damping
    pub damping: f32,
    /// Joint angle limit (radians, symmetric)
    pub joint_limit: f32,
    /// Scale of the distance potential
    pub potential_constant: f32,
    /// Cost per unit of mechanical power (negative)
    pub electricity_cost: f32,
    /// Cost per unit of squared torque (negative)
    pub stall_torque_cost: f32,
    /// Cost per joint sitting at its limit (negative)
    pub joints_at_limit_cost: f32,
}

impl Default for ReacherConfig {
    fn default() -> Self {
        Self {
            joints: 2,
            reach: 1.0,
            dt: 0.05,
            episode_time: 15.0,
            torque_gain: 8.0,
            damping: 1.0,
            joint_limit: 2.8,
            potential_constant: 100.0,
            electricity_cost: -0.1,
            stall_torque_cost: -0.01,
            joints_at_limit_cost: -0.01,
        }
    }
}

impl ReacherConfig {
    /// Preset for an arm with `joints` degrees of freedom
    #[must_use]
    pub fn dof(joints: usize) -> Self {
        Self {
            joints,
            ..Self::default()
        }
    }

    /// Apply overrides from a generic environment config
    #[must_use]
    pub fn with_overrides(mut self, config: &EnvironmentConfig) -> Self {
        self.potential_constant = config.param_f32("potential_constant", self.potential_constant);
        self.electricity_cost = config.param_f32("electricity_cost", self.electricity_cost);
        self.stall_torque_cost = config.param_f32("stall_torque_cost", self.stall_torque_cost);
        self.joints_at_limit_cost =
            config.param_f32("joints_at_limit_cost", self.joints_at_limit_cost);
        self.episode_time = config.param_f32("episode_time", self.episode_time);
        self
    }

    /// Frames per episode
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_steps(&self) -> usize {
        (self.episode_time / self.dt).round().max(1.0) as usize
    }
}

/// Planar n-link reacher environment
pub struct ReacherEnv {
    config: ReacherConfig,
    angles: Vec<f32>,
    velocities: Vec<f32>,
    target: [f32; 2],
    potential: f32,
    steps: usize,
    rng: StdRng,
}

impl ReacherEnv {
    /// Create a new reacher environment
    pub fn new(config: ReacherConfig) -> Result<Self> {
        if config.joints == 0 {
            return Err(PpoError::InvalidConfig("reacher needs at least one joint".into()));
        }
        if config.dt <= 0.0 || config.reach <= 0.0 {
            return Err(PpoError::InvalidConfig(format!(
                "reacher dt and reach must be positive, got dt={} reach={}",
                config.dt, config.reach
            )));
        }
        let joints = config.joints;
        Ok(Self {
            config,
            angles: vec![0.0; joints],
            velocities: vec![0.0; joints],
            target: [0.5, 0.0],
            potential: 0.0,
            steps: 0,
            rng: StdRng::seed_from_u64(0),
        })
    }

    /// Create from a generic environment config and a preset
    pub fn from_config(preset: ReacherConfig, config: &EnvironmentConfig) -> Result<Self> {
        let mut env = Self::new(preset.with_overrides(config))?;
        if let Some(seed) = config.seed {
            env.seed(seed);
        }
        Ok(env)
    }

    fn link_length(&self) -> f32 {
        self.config.reach / self.config.joints as f32
    }

    fn fingertip(&self) -> [f32; 2] {
        let link = self.link_length();
        let mut heading = 0.0f32;
        let mut tip = [0.0f32; 2];
        for angle in &self.angles {
            heading += angle;
            tip[0] += link * heading.cos();
            tip[1] += link * heading.sin();
        }
        tip
    }

    fn distance(&self) -> f32 {
        let tip = self.fingertip();
        (self.target[0] - tip[0]).hypot(self.target[1] - tip[1])
    }

    fn calc_potential(&self) -> f32 {
        -self.config.potential_constant * self.distance()
    }

    fn observation(&self) -> Vec<f32> {
        let tip = self.fingertip();
        let mut obs = Vec::with_capacity(self.observation_dim());
        obs.push(self.target[0] - tip[0]);
        obs.push(self.target[1] - tip[1]);
        obs.extend(self.angles.iter().map(|a| a.cos()));
        obs.extend(self.angles.iter().map(|a| a.sin()));
        obs.extend(self.velocities.iter().copied());
        obs
    }

    fn sample_target(&mut self) -> [f32; 2] {
        let radius = self.rng.gen_range(0.2..0.9) * self.config.reach;
        let theta = self.rng.gen_range(-std::f32::consts::PI..std::f32::consts::PI);
        [radius * theta.cos(), radius * theta.sin()]
    }
}

#[async_trait]
impl Environment for ReacherEnv {
    fn observation_dim(&self) -> usize {
        2 + 3 * self.config.joints
    }

    fn action_dim(&self) -> usize {
        self.config.joints
    }

    async fn reset(&mut self) -> Result<(Vec<f32>, StepInfo)> {
        for i in 0..self.config.joints {
            self.angles[i] = self.rng.gen_range(-0.1..0.1);
            self.velocities[i] = self.rng.gen_range(-0.005..0.005);
        }
        self.target = self.sample_target();
        self.potential = self.calc_potential();
        self.steps = 0;

        Ok((self.observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: &[f32]) -> Result<Step> {
        if action.len() != self.config.joints {
            return Err(PpoError::dims("reacher action", self.config.joints, action.len()));
        }

        let dt = self.config.dt;
        let mut electricity = 0.0f32;
        let mut stall = 0.0f32;
        let mut joints_at_limit = 0.0f32;

        for (i, raw) in action.iter().enumerate() {
            let torque = raw.clamp(-1.0, 1.0);
            let accel = self.config.torque_gain * torque - self.config.damping * self.velocities[i];
            self.velocities[i] += accel * dt;
            self.angles[i] += self.velocities[i] * dt;

            if self.angles[i].abs() >= self.config.joint_limit {
                self.angles[i] = self.angles[i].clamp(-self.config.joint_limit, self.config.joint_limit);
                self.velocities[i] = 0.0;
                joints_at_limit += 1.0;
            }

            electricity += (torque * self.velocities[i]).abs();
            stall += torque * torque;
        }

        let n = self.config.joints as f32;
        let potential_old = self.potential;
        self.potential = self.calc_potential();
        let progress = self.potential - potential_old;

        let reward = progress
            + self.config.electricity_cost * electricity / n
            + self.config.stall_torque_cost * stall / n
            + self.config.joints_at_limit_cost * joints_at_limit;

        self.steps += 1;
        let done = self.steps >= self.config.max_steps();

        let mut info = StepInfo::default();
        info.fields.insert("distance".to_string(), serde_json::json!(self.distance()));

        Ok(Step {
            observation: self.observation(),
            reward,
            done,
            truncated: false,
            info,
        })
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}
