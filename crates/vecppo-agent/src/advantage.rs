//! Return and advantage estimation over a filled rollout buffer
//!
//! GAE mode runs the backward recurrence
//! `δ = r[t] + γ·v[t+1]·m[t+1] − v[t]`, `gae = δ + γ·τ·m[t+1]·gae`,
//! `R[t] = gae + v[t]`. Plain mode discounts rewards back from the bootstrap
//! value, `R[t] = R[t+1]·γ·m[t+1] + r[t]`. A zero mask at `t+1` cuts both
//! recurrences at an episode boundary.

use ndarray::{s, Array1, Array2, ArrayView1};

use vecppo_core::{PpoError, Result};

use crate::buffer::RolloutBuffer;

/// Stabilizer added to the advantage standard deviation
pub const ADVANTAGE_EPS: f32 = 1e-5;

/// Below this standard deviation normalization is refused
pub const MIN_ADVANTAGE_STD: f32 = 1e-8;

/// How return targets are formed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnMode {
    /// Generalized advantage estimation with smoothing `tau`
    Gae {
        /// GAE λ
        tau: f32,
    },
    /// Discounted rewards bootstrapped from the last value
    Plain,
}

/// Computes returns into the buffer and advantages out of it
#[derive(Debug, Clone, Copy)]
pub struct AdvantageEstimator {
    gamma: f32,
    mode: ReturnMode,
}

impl AdvantageEstimator {
    /// Create an estimator
    #[must_use]
    pub fn new(gamma: f32, mode: ReturnMode) -> Self {
        Self { gamma, mode }
    }

    /// Write `value[T] := bootstrap` and fill the buffer's return targets
    pub fn compute_returns(&self, buffer: &mut RolloutBuffer, bootstrap: ArrayView1<'_, f32>) -> Result<()> {
        buffer.set_bootstrap_value(bootstrap)?;

        let t = buffer.num_steps();
        let gamma = self.gamma;
        let values = buffer.value_preds();
        let masks = buffer.masks();
        let rewards = buffer.rewards();
        let mut returns = Array2::<f32>::zeros(values.raw_dim());
        returns.row_mut(t).assign(&bootstrap);

        match self.mode {
            ReturnMode::Gae { tau } => {
                let mut gae = Array1::<f32>::zeros(buffer.num_envs());
                for step in (0..t).rev() {
                    let next_mask = masks.row(step + 1);
                    let delta = &rewards.row(step) + &(&values.row(step + 1) * &next_mask * gamma)
                        - &values.row(step);
                    gae = delta + &(&next_mask * &gae * (gamma * tau));
                    returns.row_mut(step).assign(&(&gae + &values.row(step)));
                }
            }
            ReturnMode::Plain => {
                for step in (0..t).rev() {
                    let next = &returns.row(step + 1) * &masks.row(step + 1) * gamma + &rewards.row(step);
                    returns.row_mut(step).assign(&next);
                }
            }
        }

        buffer.returns_mut().assign(&returns);
        Ok(())
    }

    /// `returns[..T] − values[..T]`, shaped `(T, N)`
    #[must_use]
    pub fn advantages(buffer: &RolloutBuffer) -> Array2<f32> {
        let t = buffer.num_steps();
        &buffer.returns().slice(s![..t, ..]) - &buffer.value_preds().slice(s![..t, ..])
    }

    /// Compute returns, then advantages, normalized when `normalize` is set
    pub fn estimate(
        &self,
        buffer: &mut RolloutBuffer,
        bootstrap: ArrayView1<'_, f32>,
        normalize: bool,
    ) -> Result<Array2<f32>> {
        self.compute_returns(buffer, bootstrap)?;
        let mut advantages = Self::advantages(buffer);
        if normalize {
            normalize_advantages(&mut advantages)?;
        }
        Ok(advantages)
    }
}

/// Standardize over every element: `(a − mean) / (std + 1e-5)` with the
/// unbiased sample standard deviation
pub fn normalize_advantages(advantages: &mut Array2<f32>) -> Result<()> {
    let n = advantages.len();
    if n < 2 {
        return Err(PpoError::NumericalDegeneracy(format!(
            "cannot normalize {n} advantage sample(s)"
        )));
    }
    if advantages.iter().any(|a| !a.is_finite()) {
        return Err(PpoError::NumericalDegeneracy(
            "non-finite advantage".into(),
        ));
    }

    let mean = advantages.sum() / n as f32;
    let std = advantages.std(1.0);
    if !std.is_finite() || std < MIN_ADVANTAGE_STD {
        return Err(PpoError::NumericalDegeneracy(format!(
            "advantage standard deviation {std} too small to normalize"
        )));
    }

    advantages.mapv_inplace(|a| (a - mean) / (std + ADVANTAGE_EPS));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array2};
    use vecppo_core::TransitionBatch;

    fn fill(buffer: &mut RolloutBuffer, rewards: &[[f32; 2]], values: &[[f32; 2]], masks: &[[f32; 2]]) {
        for step in 0..rewards.len() {
            buffer
                .insert(
                    step,
                    &TransitionBatch {
                        states: Array2::zeros((2, 1)),
                        actions: Array2::zeros((2, 1)),
                        log_probs: Array1::zeros(2),
                        values: arr1(&values[step]),
                        rewards: arr1(&rewards[step]),
                        masks: arr1(&masks[step]),
                    },
                )
                .unwrap();
        }
    }

    #[test]
    fn test_gae_with_unit_tau_matches_monte_carlo() {
        let gamma = 0.9f32;
        let rewards = [[1.0, 0.0], [2.0, 1.0], [3.0, 0.5]];
        let values = [[0.3, -0.2], [0.1, 0.4], [0.7, 0.0]];
        let masks = [[1.0, 1.0]; 3];
        let bootstrap = arr1(&[5.0f32, -1.0]);

        let mut gae_buffer = RolloutBuffer::new(3, 2, 1, 1).unwrap();
        fill(&mut gae_buffer, &rewards, &values, &masks);
        AdvantageEstimator::new(gamma, ReturnMode::Gae { tau: 1.0 })
            .compute_returns(&mut gae_buffer, bootstrap.view())
            .unwrap();

        let mut plain_buffer = gae_buffer.clone();
        AdvantageEstimator::new(gamma, ReturnMode::Plain)
            .compute_returns(&mut plain_buffer, bootstrap.view())
            .unwrap();

        for env in 0..2 {
            for step in 0..3 {
                let mut expected = 0.0f32;
                let mut discount = 1.0f32;
                for k in step..3 {
                    expected += discount * rewards[k][env];
                    discount *= gamma;
                }
                expected += discount * bootstrap[env];

                assert_relative_eq!(gae_buffer.returns()[[step, env]], expected, epsilon = 1e-4);
                assert_relative_eq!(plain_buffer.returns()[[step, env]], expected, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_zero_mask_cuts_the_recurrence() {
        let estimator = AdvantageEstimator::new(0.99, ReturnMode::Gae { tau: 0.95 });
        // Lane 0 ends its episode at step 1 (mask at slot 2 is zero).
        let masks = [[1.0, 1.0], [0.0, 1.0], [1.0, 1.0]];
        let values = [[0.5, 0.5], [0.2, 0.2], [0.9, 0.9]];

        let mut a = RolloutBuffer::new(3, 2, 1, 1).unwrap();
        fill(&mut a, &[[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]], &values, &masks);
        estimator.compute_returns(&mut a, arr1(&[3.0, 3.0]).view()).unwrap();

        let mut b = RolloutBuffer::new(3, 2, 1, 1).unwrap();
        fill(&mut b, &[[1.0, 1.0], [1.0, 1.0], [-50.0, 1.0]], &values, &masks);
        estimator.compute_returns(&mut b, arr1(&[-7.0, 3.0]).view()).unwrap();

        // Steps 0 and 1 of lane 0 ignore everything after the boundary.
        for step in 0..2 {
            assert_relative_eq!(a.returns()[[step, 0]], b.returns()[[step, 0]], epsilon = 1e-6);
        }
        assert_relative_eq!(a.returns()[[1, 0]], 1.0, epsilon = 1e-6);
        assert!((a.returns()[[2, 0]] - b.returns()[[2, 0]]).abs() > 1.0);
    }

    #[test]
    fn test_two_lane_rollout_with_mid_cycle_termination() {
        let estimator = AdvantageEstimator::new(0.99, ReturnMode::Gae { tau: 0.95 });
        let k = 0.99f32 * 0.95;
        // Lane 0 terminates at step 2, lane 1 never does.
        let masks = [[1.0, 1.0], [1.0, 1.0], [0.0, 1.0], [1.0, 1.0]];
        let values = [[0.0, 0.0]; 4];

        let mut buffer = RolloutBuffer::new(4, 2, 1, 1).unwrap();
        fill(&mut buffer, &[[1.0, 1.0]; 4], &values, &masks);
        let advantages = estimator
            .estimate(&mut buffer, arr1(&[0.0, 0.0]).view(), false)
            .unwrap();

        assert_relative_eq!(advantages[[3, 0]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(advantages[[2, 0]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(advantages[[1, 0]], 1.0 + k, epsilon = 1e-6);
        assert_relative_eq!(advantages[[0, 0]], 1.0 + k * (1.0 + k), epsilon = 1e-6);
        assert_relative_eq!(advantages[[2, 1]], 1.0 + k, epsilon = 1e-6);

        // Perturbing steps 0 and 1 leaves the post-reset segment alone.
        let mut perturbed = RolloutBuffer::new(4, 2, 1, 1).unwrap();
        fill(
            &mut perturbed,
            &[[9.0, 1.0], [-4.0, 1.0], [1.0, 1.0], [1.0, 1.0]],
            &values,
            &masks,
        );
        let other = estimator
            .estimate(&mut perturbed, arr1(&[0.0, 0.0]).view(), false)
            .unwrap();
        assert_relative_eq!(other[[3, 0]], advantages[[3, 0]]);
        assert_relative_eq!(other[[2, 0]], advantages[[2, 0]]);
    }

    #[test]
    fn test_advantages_are_returns_minus_values() {
        let mut buffer = RolloutBuffer::new(2, 2, 1, 1).unwrap();
        fill(&mut buffer, &[[1.0, 2.0], [0.0, 1.0]], &[[0.5, 0.5], [1.0, 0.0]], &[[1.0, 1.0]; 2]);
        let estimator = AdvantageEstimator::new(1.0, ReturnMode::Plain);
        let advantages = estimator
            .estimate(&mut buffer, arr1(&[0.0, 0.0]).view(), false)
            .unwrap();

        assert_eq!(advantages.dim(), (2, 2));
        assert_relative_eq!(advantages[[0, 0]], 1.0 - 0.5);
        assert_relative_eq!(advantages[[0, 1]], 3.0 - 0.5);
        assert_relative_eq!(advantages[[1, 0]], 0.0 - 1.0);
    }

    #[test]
    fn test_normalize_uses_sample_std() {
        let mut adv = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        normalize_advantages(&mut adv).unwrap();

        let std = (5.0f32 / 3.0).sqrt();
        assert_relative_eq!(adv[[0, 0]], -1.5 / (std + 1e-5), epsilon = 1e-5);
        assert_relative_eq!(adv.sum(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_normalize_rejects_degenerate_input() {
        let mut constant = Array2::from_elem((2, 3), 0.7f32);
        assert!(matches!(
            normalize_advantages(&mut constant),
            Err(PpoError::NumericalDegeneracy(_))
        ));

        let mut single = Array2::from_elem((1, 1), 1.0f32);
        assert!(normalize_advantages(&mut single).is_err());

        let mut nan = Array2::from_shape_vec((1, 2), vec![1.0, f32::NAN]).unwrap();
        assert!(normalize_advantages(&mut nan).is_err());
    }
}
