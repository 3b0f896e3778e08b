//! Vectorized environment session backed by a tokio worker pool
//!
//! Every replica lives in its own task and is driven by request/response
//! messages. [`VecEnvSession::step`] sends one request per worker and waits for
//! every reply before returning, so a batch step is a barrier across lanes.
//! Lanes that finish an episode are reset inside the worker and report the
//! fresh observation.

use ndarray::{Array1, Array2, ArrayView2};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vecppo_core::{Environment, PpoError, Result, StepInfo, TrackedEnvironment};

/// Outcome of one vectorized step
#[derive(Debug, Clone)]
pub struct BatchStep {
    /// Observations, `(N, obs_dim)`; reset observations for done lanes
    pub observations: Array2<f32>,
    /// Rewards, `(N,)`
    pub rewards: Array1<f32>,
    /// Episode-end flags, one per lane
    pub dones: Vec<bool>,
    /// Step info per lane; carries the finished episode for done lanes
    pub infos: Vec<StepInfo>,
}

impl BatchStep {
    /// Continuation masks: 0.0 for lanes that just finished, 1.0 otherwise
    #[must_use]
    pub fn masks(&self) -> Array1<f32> {
        self.dones.iter().map(|&d| if d { 0.0 } else { 1.0 }).collect()
    }
}

struct LaneStep {
    observation: Vec<f32>,
    reward: f32,
    done: bool,
    info: StepInfo,
}

enum WorkerRequest {
    Reset {
        reply: oneshot::Sender<Result<Vec<f32>>>,
    },
    Step {
        action: Vec<f32>,
        reply: oneshot::Sender<Result<LaneStep>>,
    },
    Close {
        reply: oneshot::Sender<Result<()>>,
    },
}

struct Worker {
    requests: mpsc::Sender<WorkerRequest>,
    handle: JoinHandle<()>,
}

async fn run_worker<E: Environment>(rank: usize, mut env: E, mut requests: mpsc::Receiver<WorkerRequest>) {
    while let Some(request) = requests.recv().await {
        match request {
            WorkerRequest::Reset { reply } => {
                let result = env.reset().await.map(|(obs, _)| obs);
                let _ = reply.send(result);
            }
            WorkerRequest::Step { action, reply } => {
                let result = step_lane(&mut env, &action).await;
                let _ = reply.send(result);
            }
            WorkerRequest::Close { reply } => {
                let _ = reply.send(env.close().await);
                break;
            }
        }
    }
    debug!(rank, "environment worker stopped");
}

async fn step_lane<E: Environment>(env: &mut E, action: &[f32]) -> Result<LaneStep> {
    let step = env.step(action).await?;
    let done = step.done || step.truncated;
    let observation = if done {
        env.reset().await?.0
    } else {
        step.observation
    };
    Ok(LaneStep {
        observation,
        reward: step.reward,
        done,
        info: step.info,
    })
}

/// Handle to `N` environment replicas running in worker tasks
pub struct VecEnvSession {
    workers: Vec<Worker>,
    observation_dim: usize,
    action_dim: usize,
}

impl VecEnvSession {
    /// Spawn one worker task per environment.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<E>(envs: Vec<E>) -> Result<Self>
    where
        E: Environment + 'static,
    {
        let Some(first) = envs.first() else {
            return Err(PpoError::InvalidConfig(
                "vectorized session needs at least one environment".into(),
            ));
        };
        let observation_dim = first.observation_dim();
        let action_dim = first.action_dim();

        for env in &envs {
            if env.observation_dim() != observation_dim {
                return Err(PpoError::dims(
                    "replica observation_dim",
                    observation_dim,
                    env.observation_dim(),
                ));
            }
            if env.action_dim() != action_dim {
                return Err(PpoError::dims("replica action_dim", action_dim, env.action_dim()));
            }
        }

        let workers = envs
            .into_iter()
            .enumerate()
            .map(|(rank, env)| {
                let (tx, rx) = mpsc::channel(1);
                let handle = tokio::spawn(run_worker(rank, TrackedEnvironment::new(env), rx));
                Worker {
                    requests: tx,
                    handle,
                }
            })
            .collect::<Vec<_>>();

        debug!(num_envs = workers.len(), observation_dim, action_dim, "spawned environment workers");

        Ok(Self {
            workers,
            observation_dim,
            action_dim,
        })
    }

    /// Build `num_envs` replicas with `make(rank)`, seed replica `rank` with
    /// `seed + rank`, and spawn them.
    pub fn from_factory<E, F>(num_envs: usize, seed: u64, mut make: F) -> Result<Self>
    where
        E: Environment + 'static,
        F: FnMut(usize) -> Result<E>,
    {
        let mut envs = Vec::with_capacity(num_envs);
        for rank in 0..num_envs {
            let mut env = make(rank)?;
            env.seed(seed + rank as u64);
            envs.push(env);
        }
        Self::spawn(envs)
    }

    /// Number of replicas `N`
    #[must_use]
    pub fn num_envs(&self) -> usize {
        self.workers.len()
    }

    /// Raw observation length
    #[must_use]
    pub fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    /// Action length
    #[must_use]
    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Reset every replica, returning `(N, obs_dim)` observations
    pub async fn reset(&mut self) -> Result<Array2<f32>> {
        let mut replies = Vec::with_capacity(self.workers.len());
        for (rank, worker) in self.workers.iter().enumerate() {
            let (reply, rx) = oneshot::channel();
            send(rank, worker, WorkerRequest::Reset { reply }).await?;
            replies.push(rx);
        }

        let mut observations = Array2::zeros((self.workers.len(), self.observation_dim));
        for (rank, rx) in replies.into_iter().enumerate() {
            let obs = receive(rank, rx).await??;
            self.write_row(&mut observations, rank, &obs)?;
        }
        Ok(observations)
    }

    /// Step every replica with its row of `actions`, `(N, action_dim)`
    pub async fn step(&mut self, actions: ArrayView2<'_, f32>) -> Result<BatchStep> {
        if actions.nrows() != self.workers.len() {
            return Err(PpoError::dims("vectorized step lanes", self.workers.len(), actions.nrows()));
        }
        if actions.ncols() != self.action_dim {
            return Err(PpoError::dims("vectorized step action_dim", self.action_dim, actions.ncols()));
        }

        let mut replies = Vec::with_capacity(self.workers.len());
        for (rank, worker) in self.workers.iter().enumerate() {
            let (reply, rx) = oneshot::channel();
            let action = actions.row(rank).to_vec();
            send(rank, worker, WorkerRequest::Step { action, reply }).await?;
            replies.push(rx);
        }

        let n = self.workers.len();
        let mut observations = Array2::zeros((n, self.observation_dim));
        let mut rewards = Array1::zeros(n);
        let mut dones = Vec::with_capacity(n);
        let mut infos = Vec::with_capacity(n);

        for (rank, rx) in replies.into_iter().enumerate() {
            let lane = receive(rank, rx).await??;
            self.write_row(&mut observations, rank, &lane.observation)?;
            rewards[rank] = lane.reward;
            dones.push(lane.done);
            infos.push(lane.info);
        }

        Ok(BatchStep {
            observations,
            rewards,
            dones,
            infos,
        })
    }

    /// Close every replica and wait for the worker tasks to finish
    pub async fn close(self) -> Result<()> {
        let mut first_error = None;
        for (rank, worker) in self.workers.into_iter().enumerate() {
            let (reply, rx) = oneshot::channel();
            if worker.requests.send(WorkerRequest::Close { reply }).await.is_ok() {
                if let Ok(Err(e)) = rx.await {
                    warn!(rank, error = %e, "environment failed to close");
                    first_error.get_or_insert(e);
                }
            }
            drop(worker.requests);
            if let Err(e) = worker.handle.await {
                warn!(rank, error = %e, "environment worker panicked");
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn write_row(&self, out: &mut Array2<f32>, rank: usize, obs: &[f32]) -> Result<()> {
        if obs.len() != self.observation_dim {
            return Err(PpoError::dims("replica observation", self.observation_dim, obs.len()));
        }
        out.row_mut(rank)
            .iter_mut()
            .zip(obs)
            .for_each(|(dst, &src)| *dst = src);
        Ok(())
    }
}

async fn send(rank: usize, worker: &Worker, request: WorkerRequest) -> Result<()> {
    worker
        .requests
        .send(request)
        .await
        .map_err(|_| PpoError::Environment(format!("environment worker {rank} stopped")))
}

async fn receive<T>(rank: usize, rx: oneshot::Receiver<T>) -> Result<T> {
    rx.await
        .map_err(|_| PpoError::Environment(format!("environment worker {rank} dropped its reply")))
}
