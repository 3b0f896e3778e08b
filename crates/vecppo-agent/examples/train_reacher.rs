//! Train a PPO agent on the two-joint reacher.
//!
//! ```text
//! cargo run --release --example train_reacher -- [config.json] [checkpoint_dir]
//! ```
//!
//! `RUST_LOG=debug` shows per-minibatch losses.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vecppo_agent::prelude::*;
use vecppo_env::{make_env, EnvironmentConfig};

const ENV_NAME: &str = "Reacher2DoF";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PPOConfig::from_json_file(&path).with_context(|| format!("loading {path}"))?,
        None => PPOConfig::default(),
    };
    let checkpoint_dir = args.next().unwrap_or_else(|| "checkpoints".to_string());
    config.validate()?;

    let base = &config.base;
    let envs = VecEnvSession::from_factory(base.num_processes, base.seed, |_| {
        make_env(ENV_NAME, EnvironmentConfig::default())
    })?;
    let state_dim = base.num_stack * envs.observation_dim();
    let policy = MlpGaussianPolicy::new(
        state_dim,
        envs.action_dim(),
        &config.mlp(),
        &mut StdRng::seed_from_u64(base.seed),
    )?;
    info!(
        env = ENV_NAME,
        state_dim,
        parameters = policy.num_parameters(),
        "built policy"
    );

    let mut trainer = Trainer::new(
        config.clone(),
        policy,
        envs,
        TracingReporter,
        JsonCheckpointer::new(checkpoint_dir),
    )?;
    if !config.no_test {
        let test_env = make_env(
            ENV_NAME,
            EnvironmentConfig {
                seed: Some(config.base.seed + 1000),
                ..EnvironmentConfig::default()
            },
        )?;
        trainer = trainer.with_evaluator(Evaluator::new(
            test_env,
            config.base.num_stack,
            config.num_test,
            config.max_test_length,
        )?);
    }

    let stop = trainer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after this cycle");
            stop.stop();
        }
    });

    let ctx = trainer.run().await?;
    info!(
        updates = ctx.completed_updates,
        frame = ctx.frame,
        best_score = ctx.best_score.unwrap_or(f32::NAN),
        "done"
    );
    trainer.shutdown().await?;
    Ok(())
}
