//! Randomized minibatch partitioning of a rollout

use ndarray::{s, Array1, Array2, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;

use vecppo_core::{PpoError, Result};

use crate::buffer::RolloutBuffer;

/// One minibatch gathered from the buffer
#[derive(Debug, Clone)]
pub struct Minibatch {
    /// Flat sample indices, `step * N + env`
    pub indices: Vec<usize>,
    /// States the actions were taken in, `(B, state_dim)`
    pub states: Array2<f32>,
    /// Actions, `(B, action_dim)`
    pub actions: Array2<f32>,
    /// Return targets, `(B,)`
    pub returns: Array1<f32>,
    /// Continuation masks of the states, `(B,)`
    pub masks: Array1<f32>,
    /// Log-probs recorded at collection time, `(B,)`
    pub old_log_probs: Array1<f32>,
    /// Advantage targets, `(B,)`
    pub advantages: Array1<f32>,
}

impl Minibatch {
    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when the minibatch holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Shuffles `[0, T·N)` and slices it into chunks of `batch_size`
#[derive(Debug, Clone, Copy)]
pub struct MinibatchSampler {
    batch_size: usize,
}

impl MinibatchSampler {
    /// Create a sampler; `batch_size` must be positive
    pub fn new(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PpoError::InvalidConfig("minibatch size must be positive".into()));
        }
        Ok(Self { batch_size })
    }

    /// Minibatch size
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// One fresh permutation of `[0, total)` cut into chunks; the last chunk
    /// may be shorter
    pub fn partition<R: Rng + ?Sized>(&self, total: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..total).collect();
        indices.shuffle(rng);
        indices.chunks(self.batch_size).map(<[usize]>::to_vec).collect()
    }

    /// One epoch of minibatches over `buffer` and its `(T, N)` advantages
    pub fn epoch<R: Rng + ?Sized>(
        &self,
        buffer: &RolloutBuffer,
        advantages: ArrayView2<'_, f32>,
        rng: &mut R,
    ) -> Result<Vec<Minibatch>> {
        let expected = (buffer.num_steps(), buffer.num_envs());
        if advantages.dim() != expected {
            return Err(PpoError::dims(
                "advantages",
                expected.0 * expected.1,
                advantages.len(),
            ));
        }
        Ok(self
            .partition(buffer.len(), rng)
            .into_iter()
            .map(|indices| gather(buffer, advantages, indices))
            .collect())
    }
}

/// Collect the samples at flat `indices`, mapping `i` to `(i / N, i % N)`
#[must_use]
pub fn gather(buffer: &RolloutBuffer, advantages: ArrayView2<'_, f32>, indices: Vec<usize>) -> Minibatch {
    let n = buffer.num_envs();
    let b = indices.len();
    let mut states = Array2::zeros((b, buffer.state_dim()));
    let mut actions = Array2::zeros((b, buffer.action_dim()));
    let mut returns = Array1::zeros(b);
    let mut masks = Array1::zeros(b);
    let mut old_log_probs = Array1::zeros(b);
    let mut adv = Array1::zeros(b);

    let all_states = buffer.states();
    let all_actions = buffer.actions();
    for (row, &i) in indices.iter().enumerate() {
        let (step, env) = (i / n, i % n);
        states.row_mut(row).assign(&all_states.slice(s![step, env, ..]));
        actions.row_mut(row).assign(&all_actions.slice(s![step, env, ..]));
        returns[row] = buffer.returns()[[step, env]];
        masks[row] = buffer.masks()[[step, env]];
        old_log_probs[row] = buffer.log_probs()[[step, env]];
        adv[row] = advantages[[step, env]];
    }

    Minibatch {
        indices,
        states,
        actions,
        returns,
        masks,
        old_log_probs,
        advantages: adv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use vecppo_core::TransitionBatch;

    proptest! {
        #[test]
        fn prop_partition_covers_every_index_once(
            total in 1usize..600,
            batch_size in 1usize..130,
            seed in any::<u64>(),
        ) {
            let sampler = MinibatchSampler::new(batch_size).unwrap();
            let chunks = sampler.partition(total, &mut StdRng::seed_from_u64(seed));

            prop_assert_eq!(chunks.len(), (total + batch_size - 1) / batch_size);
            for chunk in &chunks[..chunks.len() - 1] {
                prop_assert_eq!(chunk.len(), batch_size);
            }
            let mut seen: Vec<usize> = chunks.into_iter().flatten().collect();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..total).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_same_seed_same_partition() {
        let sampler = MinibatchSampler::new(4).unwrap();
        let a = sampler.partition(20, &mut StdRng::seed_from_u64(3));
        let b = sampler.partition(20, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);

        let mut rng = StdRng::seed_from_u64(3);
        let first = sampler.partition(20, &mut rng);
        let second = sampler.partition(20, &mut rng);
        assert_ne!(first, second);
    }

    #[test]
    fn test_gather_maps_flat_index_to_step_and_env() {
        let mut buffer = RolloutBuffer::new(2, 3, 1, 1).unwrap();
        buffer
            .set_first_state(arr1(&[100.0, 101.0, 102.0]).insert_axis(ndarray::Axis(1)).view())
            .unwrap();
        for step in 0..2 {
            let base = (step as f32 + 1.0) * 10.0;
            buffer
                .insert(
                    step,
                    &TransitionBatch {
                        states: arr1(&[base, base + 1.0, base + 2.0]).insert_axis(ndarray::Axis(1)),
                        actions: arr1(&[base, base + 1.0, base + 2.0]).insert_axis(ndarray::Axis(1)),
                        log_probs: arr1(&[-base, -base - 1.0, -base - 2.0]),
                        values: Array1::zeros(3),
                        rewards: Array1::zeros(3),
                        masks: Array1::ones(3),
                    },
                )
                .unwrap();
        }
        let advantages = Array2::from_shape_fn((2, 3), |(t, e)| (t * 3 + e) as f32);

        // Flat index 4 is step 1, env 1.
        let batch = gather(&buffer, advantages.view(), vec![4, 0]);
        assert_eq!(batch.len(), 2);
        // States come from slot `step`, the state the action was taken in.
        assert_eq!(batch.states[[0, 0]], 11.0);
        assert_eq!(batch.states[[1, 0]], 100.0);
        assert_eq!(batch.actions[[0, 0]], 21.0);
        assert_eq!(batch.old_log_probs[0], -21.0);
        assert_eq!(batch.advantages.to_vec(), vec![4.0, 0.0]);
    }

    #[test]
    fn test_epoch_checks_advantage_shape() {
        let buffer = RolloutBuffer::new(2, 2, 1, 1).unwrap();
        let sampler = MinibatchSampler::new(3).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let batches = sampler.epoch(&buffer, Array2::zeros((2, 2)).view(), &mut rng).unwrap();
        assert_eq!(batches.iter().map(Minibatch::len).collect::<Vec<_>>(), vec![3, 1]);
        assert!(sampler.epoch(&buffer, Array2::zeros((3, 2)).view(), &mut rng).is_err());
        assert!(MinibatchSampler::new(0).is_err());
    }
}
