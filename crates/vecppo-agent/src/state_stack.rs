//! Per-environment stack of the last `K` observations

use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2};

use vecppo_core::{PpoError, Result};

/// `(N, K, obs_dim)` block; index `K-1` holds the most recent observation
#[derive(Debug, Clone)]
pub struct StateStack {
    frames: Array3<f32>,
}

impl StateStack {
    /// Zeroed stack for `num_envs` lanes of `num_stack` frames
    pub fn new(num_envs: usize, num_stack: usize, obs_dim: usize) -> Result<Self> {
        if num_envs == 0 || num_stack == 0 || obs_dim == 0 {
            return Err(PpoError::InvalidConfig(format!(
                "state stack needs non-zero sizes, got N={num_envs} K={num_stack} obs_dim={obs_dim}"
            )));
        }
        Ok(Self {
            frames: Array3::zeros((num_envs, num_stack, obs_dim)),
        })
    }

    /// Number of lanes `N`
    #[must_use]
    pub fn num_envs(&self) -> usize {
        self.frames.dim().0
    }

    /// Frames per lane `K`
    #[must_use]
    pub fn num_stack(&self) -> usize {
        self.frames.dim().1
    }

    /// Raw observation length
    #[must_use]
    pub fn obs_dim(&self) -> usize {
        self.frames.dim().2
    }

    /// Flattened state length `K * obs_dim`
    #[must_use]
    pub fn state_dim(&self) -> usize {
        self.num_stack() * self.obs_dim()
    }

    /// Shift every lane one frame toward the past and write `obs` into slot `K-1`
    pub fn update(&mut self, obs: ArrayView2<'_, f32>) -> Result<()> {
        let (n, k, d) = self.frames.dim();
        if obs.dim() != (n, d) {
            return Err(PpoError::dims("state stack update", n * d, obs.len()));
        }

        if k > 1 {
            let shifted = self.frames.slice(s![.., 1.., ..]).to_owned();
            self.frames.slice_mut(s![.., ..k - 1, ..]).assign(&shifted);
        }
        self.frames.slice_mut(s![.., k - 1, ..]).assign(&obs);
        Ok(())
    }

    /// Multiply each lane by its continuation mask; masks must be 0 or 1
    pub fn reset_for(&mut self, masks: ArrayView1<'_, f32>) -> Result<()> {
        let n = self.num_envs();
        if masks.len() != n {
            return Err(PpoError::dims("state stack mask", n, masks.len()));
        }
        if let Some((index, &value)) = masks
            .iter()
            .enumerate()
            .find(|(_, &m)| m != 0.0 && m != 1.0)
        {
            return Err(PpoError::InvalidMask { index, value });
        }

        for (i, &m) in masks.iter().enumerate() {
            if m == 0.0 {
                self.frames.slice_mut(s![i, .., ..]).fill(0.0);
            }
        }
        Ok(())
    }

    /// Zero every lane
    pub fn reset(&mut self) {
        self.frames.fill(0.0);
    }

    /// `(N, K * obs_dim)` view of the stack, oldest frame first
    #[must_use]
    pub fn flatten(&self) -> Array2<f32> {
        let (n, k, d) = self.frames.dim();
        let mut out = Array2::zeros((n, k * d));
        for (i, lane) in self.frames.outer_iter().enumerate() {
            out.row_mut(i)
                .iter_mut()
                .zip(lane.iter())
                .for_each(|(dst, &src)| *dst = src);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_update_shifts_and_appends() {
        let mut stack = StateStack::new(2, 3, 2).unwrap();
        stack.update(arr2(&[[1.0, 1.0], [10.0, 10.0]]).view()).unwrap();
        stack.update(arr2(&[[2.0, 2.0], [20.0, 20.0]]).view()).unwrap();

        assert_eq!(
            stack.flatten(),
            arr2(&[
                [0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
                [0.0, 0.0, 10.0, 10.0, 20.0, 20.0]
            ])
        );
    }

    #[test]
    fn test_single_frame_is_replace() {
        let mut stack = StateStack::new(1, 1, 3).unwrap();
        stack.update(arr2(&[[1.0, 2.0, 3.0]]).view()).unwrap();
        stack.update(arr2(&[[4.0, 5.0, 6.0]]).view()).unwrap();
        assert_eq!(stack.flatten(), arr2(&[[4.0, 5.0, 6.0]]));
    }

    #[test]
    fn test_reset_for_zeroes_only_masked_lane() {
        let mut stack = StateStack::new(3, 2, 1).unwrap();
        stack.update(arr2(&[[1.0], [2.0], [3.0]]).view()).unwrap();
        stack.update(arr2(&[[4.0], [5.0], [6.0]]).view()).unwrap();

        stack.reset_for(arr1(&[1.0, 0.0, 1.0]).view()).unwrap();
        assert_eq!(stack.flatten(), arr2(&[[1.0, 4.0], [0.0, 0.0], [3.0, 6.0]]));
    }

    #[test]
    fn test_non_binary_mask_is_rejected() {
        let mut stack = StateStack::new(2, 1, 1).unwrap();
        let err = stack.reset_for(arr1(&[1.0, 0.5]).view()).unwrap_err();
        assert!(matches!(err, PpoError::InvalidMask { index: 1, .. }));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut stack = StateStack::new(2, 1, 3).unwrap();
        let err = stack.update(arr2(&[[1.0, 2.0]]).view()).unwrap_err();
        assert!(matches!(err, PpoError::DimensionMismatch { .. }));
        assert!(stack.reset_for(arr1(&[1.0]).view()).is_err());
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut stack = StateStack::new(2, 2, 1).unwrap();
        stack.update(arr2(&[[1.0], [2.0]]).view()).unwrap();
        stack.reset();
        assert!(stack.flatten().iter().all(|&x| x == 0.0));
    }
}
