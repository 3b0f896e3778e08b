//! PPO training loop over a vectorized environment session
//!
//! Each cycle runs `COLLECTING → BOOTSTRAPPING → OPTIMIZING → ROTATING`. The
//! trainer owns the policy, optimizer, rollout buffer and state stack and
//! lends them to one phase at a time. Stop requests are honoured only between
//! cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use vecppo_core::{ActorCritic, Episode, PpoError, Result, TransitionBatch};
use vecppo_env::VecEnvSession;

use crate::advantage::AdvantageEstimator;
use crate::buffer::RolloutBuffer;
use crate::evaluate::Evaluator;
use crate::ppo::{PPOConfig, PpoLosses, PpoUpdate};
use crate::report::{Checkpoint, CheckpointSink, CycleMetrics, Reporter};
use crate::sampler::MinibatchSampler;
use crate::state_stack::StateStack;
use crate::stats::{EpisodeAccumulator, LossWindow, EPISODE_WINDOW, LOSS_WINDOW};
use crate::utils::ObservationFilter;

/// Phase of a training cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Stepping the environments and filling the buffer
    Collecting,
    /// Value of the last state and advantage estimation
    Bootstrapping,
    /// PPO epochs over the rollout
    Optimizing,
    /// Carry-over, loss bookkeeping and reporting
    Rotating,
}

/// Shared flag asking the trainer to stop after the current cycle
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request a stop
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mutable run state threaded through every phase
#[derive(Debug, Clone)]
pub struct TrainingContext {
    /// Index of the current (or last finished) cycle
    pub update: usize,
    /// Cycles completed
    pub completed_updates: usize,
    /// Environment frames collected
    pub frame: usize,
    /// Phase being executed
    pub phase: Phase,
    /// Per-lane episode rewards and the finished-episode window
    pub episodes: EpisodeAccumulator,
    /// Recent cycle losses
    pub losses: LossWindow,
    /// Action standard deviation of the latest collection
    pub action_std: f32,
    /// Summary of the most recently finished episode
    pub last_episode: Option<Episode>,
    /// Highest average test reward so far
    pub best_score: Option<f32>,
}

impl TrainingContext {
    /// Fresh context for `num_envs` lanes
    #[must_use]
    pub fn new(num_envs: usize) -> Self {
        Self {
            update: 0,
            completed_updates: 0,
            frame: 0,
            phase: Phase::Collecting,
            episodes: EpisodeAccumulator::new(num_envs, EPISODE_WINDOW),
            losses: LossWindow::new(LOSS_WINDOW),
            action_std: 0.0,
            last_episode: None,
            best_score: None,
        }
    }

    fn metrics(&self) -> CycleMetrics {
        let losses = self.losses.mean();
        CycleMetrics {
            update: self.update,
            frame: self.frame,
            mean_reward: self.episodes.mean_reward(),
            value_loss: losses.value_loss,
            policy_loss: losses.policy_loss,
            entropy: losses.entropy,
            action_std: self.action_std,
            episodes: self.episodes.total_episodes(),
        }
    }
}

/// On-policy PPO trainer
pub struct Trainer<P, R, C> {
    config: PPOConfig,
    policy: P,
    update_step: PpoUpdate,
    estimator: AdvantageEstimator,
    sampler: MinibatchSampler,
    buffer: RolloutBuffer,
    stack: StateStack,
    envs: VecEnvSession,
    filter: Option<ObservationFilter>,
    evaluator: Option<Evaluator>,
    reporter: R,
    checkpoints: C,
    rng: StdRng,
    stop: StopHandle,
}

impl<P, R, C> Trainer<P, R, C>
where
    P: ActorCritic,
    R: Reporter,
    C: CheckpointSink,
{
    /// Validate the configuration against the policy and environments and
    /// allocate the buffer and state stack
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(config: PPOConfig, policy: P, envs: VecEnvSession, reporter: R, checkpoints: C) -> Result<Self> {
        config.validate()?;
        let base = &config.base;

        if envs.num_envs() != base.num_processes {
            return Err(PpoError::dims("environment replicas", base.num_processes, envs.num_envs()));
        }
        let state_dim = base.num_stack * envs.observation_dim();
        if policy.state_dim() != state_dim {
            return Err(PpoError::dims("policy state_dim", state_dim, policy.state_dim()));
        }
        if policy.action_dim() != envs.action_dim() {
            return Err(PpoError::dims("policy action_dim", envs.action_dim(), policy.action_dim()));
        }

        let buffer = RolloutBuffer::new(base.num_steps, base.num_processes, state_dim, envs.action_dim())?;
        let stack = StateStack::new(base.num_processes, base.num_stack, envs.observation_dim())?;
        let filter = config
            .normalize_observations
            .then(|| ObservationFilter::new(envs.observation_dim()));
        let update_step = PpoUpdate::new(&config, policy.parameters().len());
        let estimator = AdvantageEstimator::new(base.gamma as f32, config.return_mode());
        let sampler = MinibatchSampler::new(config.batch_size)?;
        let rng = StdRng::seed_from_u64(base.seed);

        Ok(Self {
            config,
            policy,
            update_step,
            estimator,
            sampler,
            buffer,
            stack,
            envs,
            filter,
            evaluator: None,
            reporter,
            checkpoints,
            rng,
            stop: StopHandle::default(),
        })
    }

    /// Attach a test-time evaluator
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Handle that stops the run between cycles
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Trained policy
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Reporting collaborator
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Checkpoint collaborator
    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    /// Rollout storage
    pub fn buffer(&self) -> &RolloutBuffer {
        &self.buffer
    }

    /// Observation normalizer, when enabled
    pub fn filter(&self) -> Option<&ObservationFilter> {
        self.filter.as_ref()
    }

    /// Run every configured cycle, or until a stop is requested
    pub async fn run(&mut self) -> Result<TrainingContext> {
        let num_updates = self.config.num_updates();
        let mut ctx = TrainingContext::new(self.envs.num_envs());
        info!(
            num_updates,
            num_steps = self.config.base.num_steps,
            num_processes = self.config.base.num_processes,
            "starting training"
        );

        self.start().await?;
        for update in 0..num_updates {
            if self.stop.is_stopped() {
                info!(update, "stop requested");
                break;
            }
            ctx.update = update;
            self.cycle(&mut ctx).await?;
        }

        info!(updates = ctx.completed_updates, frame = ctx.frame, "training finished");
        Ok(ctx)
    }

    /// Reset every environment and seed slot 0 of the buffer
    pub async fn start(&mut self) -> Result<()> {
        let obs = self.envs.reset().await?;
        let obs = self.observe(obs);
        self.stack.reset();
        self.stack.update(obs.view())?;
        self.buffer.set_first_state(self.stack.flatten().view())
    }

    /// One full `COLLECTING → BOOTSTRAPPING → OPTIMIZING → ROTATING` cycle
    pub async fn cycle(&mut self, ctx: &mut TrainingContext) -> Result<PpoLosses> {
        ctx.phase = Phase::Collecting;
        self.collect(ctx).await?;

        ctx.phase = Phase::Bootstrapping;
        let advantages = self.bootstrap()?;

        ctx.phase = Phase::Optimizing;
        let losses = self.update_step.optimize(
            &mut self.policy,
            &self.buffer,
            advantages.view(),
            &self.sampler,
            self.config.ppo_epoch,
            &mut self.rng,
        )?;

        ctx.phase = Phase::Rotating;
        self.rotate(ctx, losses);
        self.test(ctx).await?;
        ctx.completed_updates += 1;
        Ok(losses)
    }

    async fn collect(&mut self, ctx: &mut TrainingContext) -> Result<()> {
        let n = self.envs.num_envs();
        let mut action_std = 0.0;

        for step in 0..self.buffer.num_steps() {
            let states = self.stack.flatten();
            let sample = self.policy.sample(states.view(), &mut self.rng, false)?;
            action_std = sample.action_std;

            let batch = self.envs.step(sample.actions.view()).await?;
            ctx.episodes.accumulate(batch.rewards.view())?;
            let masks = batch.masks();
            let finished = ctx.episodes.finish(&batch.dones)?;
            if finished > 0 {
                debug!(step, finished, "episodes finished");
            }
            for (lane, info) in batch.infos.into_iter().enumerate() {
                if let Some(episode) = info.episode {
                    debug!(
                        lane,
                        id = %episode.id,
                        steps = episode.steps,
                        reward = episode.total_reward,
                        "episode summary"
                    );
                    ctx.last_episode = Some(episode);
                }
            }

            self.stack.reset_for(masks.view())?;
            let obs = self.observe(batch.observations);
            self.stack.update(obs.view())?;

            self.buffer.insert(
                step,
                &TransitionBatch {
                    states: self.stack.flatten(),
                    actions: sample.actions,
                    log_probs: sample.log_probs,
                    values: sample.values,
                    rewards: batch.rewards,
                    masks,
                },
            )?;

            ctx.frame += n;
            self.policy.advance_frames(n);
        }

        ctx.action_std = action_std;
        Ok(())
    }

    fn bootstrap(&mut self) -> Result<Array2<f32>> {
        let bootstrap = self.policy.value(self.buffer.last_state())?;
        self.estimator
            .estimate(&mut self.buffer, bootstrap.view(), self.config.normalize_advantages)
    }

    fn rotate(&mut self, ctx: &mut TrainingContext, losses: PpoLosses) {
        self.buffer.rotate();
        ctx.losses.push(losses);

        if ctx.update % self.config.log_interval == 0 && ctx.update > 0 {
            self.reporter.report(&ctx.metrics());
        }
    }

    async fn test(&mut self, ctx: &mut TrainingContext) -> Result<()> {
        let Some(evaluator) = self.evaluator.as_mut() else {
            return Ok(());
        };
        if !Evaluator::should_test(ctx.update, &self.config) {
            return Ok(());
        }

        let score = evaluator
            .run(&self.policy, self.filter.as_ref(), &mut self.rng)
            .await?;
        self.reporter.report_test(ctx.frame, score);

        let best = ctx.best_score.map_or(true, |b| score > b);
        if best {
            info!(frame = ctx.frame, score, "new high score");
            ctx.best_score = Some(score);
        }

        let checkpoint = Checkpoint {
            frame: ctx.frame,
            score,
            best,
            parameters: self.policy.parameters().to_vec(),
            observation_stats: self.filter.as_ref().map(|f| f.stats.clone()),
        };
        self.checkpoints.save(&checkpoint).await
    }

    fn observe(&mut self, obs: Array2<f32>) -> Array2<f32> {
        match self.filter.as_mut() {
            Some(filter) => filter.filter(obs.view()),
            None => obs,
        }
    }

    /// Close the environment workers
    pub async fn shutdown(self) -> Result<()> {
        self.envs.close().await
    }
}
