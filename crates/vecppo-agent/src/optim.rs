//! Adam over a flat parameter vector and global-norm gradient clipping

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use vecppo_core::{PpoError, Result};

/// Adam hyper-parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdamConfig {
    /// Step size
    pub learning_rate: f32,
    /// First-moment decay
    pub beta1: f32,
    /// Second-moment decay
    pub beta2: f32,
    /// Denominator stabilizer
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Adam optimizer state
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    momentum: Array1<f32>,
    velocity: Array1<f32>,
    t: i32,
}

impl Adam {
    /// Create an optimizer for `num_params` parameters
    #[must_use]
    pub fn new(config: AdamConfig, num_params: usize) -> Self {
        Self {
            config,
            momentum: Array1::zeros(num_params),
            velocity: Array1::zeros(num_params),
            t: 0,
        }
    }

    /// Steps taken so far
    #[must_use]
    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Apply one bias-corrected update to `params` in place
    pub fn step(&mut self, params: &mut Array1<f32>, grads: ArrayView1<'_, f32>) -> Result<()> {
        let n = self.momentum.len();
        if params.len() != n {
            return Err(PpoError::dims("adam parameters", n, params.len()));
        }
        if grads.len() != n {
            return Err(PpoError::dims("adam gradient", n, grads.len()));
        }

        let AdamConfig {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        self.t += 1;
        let bias1 = 1.0 - beta1.powi(self.t);
        let bias2 = 1.0 - beta2.powi(self.t);

        for i in 0..n {
            let g = grads[i];
            self.momentum[i] = beta1 * self.momentum[i] + (1.0 - beta1) * g;
            self.velocity[i] = beta2 * self.velocity[i] + (1.0 - beta2) * g * g;

            let m_hat = self.momentum[i] / bias1;
            let v_hat = self.velocity[i] / bias2;
            params[i] -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
        }
        Ok(())
    }
}

/// Rescale `grads` so its L2 norm is at most `max_norm`; returns the norm
/// before clipping
pub fn clip_grad_norm(grads: &mut Array1<f32>, max_norm: f32) -> f32 {
    let norm = grads.iter().map(|g| g * g).sum::<f32>().sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        grads.mapv_inplace(|g| g * scale);
    }
    norm
}
