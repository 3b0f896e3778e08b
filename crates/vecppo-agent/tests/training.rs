//! End-to-end training runs on the reacher environments

use rand::rngs::StdRng;
use rand::SeedableRng;

use vecppo_agent::{
    Evaluator, JsonCheckpointer, MemoryCheckpointer, MemoryReporter, MlpGaussianPolicy, PPOConfig, Phase,
    Trainer,
};
use vecppo_core::ActorCritic;
use vecppo_env::{make_env, EnvironmentConfig, VecEnvSession};

const EPISODE_LEN: usize = 20;

fn small_config(updates: usize) -> PPOConfig {
    let mut config = PPOConfig::from_json_str(
        r#"{
            "num_steps": 16,
            "num_processes": 2,
            "num_stack": 2,
            "seed": 7,
            "batch_size": 8,
            "ppo_epoch": 2,
            "hidden": 16,
            "test_interval": 2,
            "num_test": 2,
            "max_test_length": 20
        }"#,
    )
    .unwrap();
    config.base.num_frames = updates * config.base.batch_len();
    config
}

fn env_config(seed: u64) -> EnvironmentConfig {
    EnvironmentConfig {
        seed: Some(seed),
        max_steps: Some(EPISODE_LEN),
        ..EnvironmentConfig::default()
    }
}

fn build<R, C>(config: &PPOConfig, reporter: R, sink: C) -> Trainer<MlpGaussianPolicy, R, C>
where
    R: vecppo_agent::Reporter,
    C: vecppo_agent::CheckpointSink,
{
    let base = &config.base;
    let envs = VecEnvSession::from_factory(base.num_processes, base.seed, |rank| {
        make_env("Reacher2DoF", env_config(base.seed + rank as u64))
    })
    .unwrap();
    let policy = MlpGaussianPolicy::new(
        base.num_stack * envs.observation_dim(),
        envs.action_dim(),
        &config.mlp(),
        &mut StdRng::seed_from_u64(base.seed),
    )
    .unwrap();
    let evaluator = Evaluator::new(
        make_env("Reacher2DoF", env_config(999)).unwrap(),
        base.num_stack,
        config.num_test,
        config.max_test_length,
    )
    .unwrap();
    Trainer::new(config.clone(), policy, envs, reporter, sink)
        .unwrap()
        .with_evaluator(evaluator)
}

#[tokio::test]
async fn test_training_run_reports_tests_and_checkpoints() {
    let config = small_config(4);
    let mut trainer = build(&config, MemoryReporter::default(), MemoryCheckpointer::default());
    let ctx = trainer.run().await.unwrap();

    assert_eq!(ctx.completed_updates, 4);
    assert_eq!(ctx.frame, 4 * 16 * 2);
    assert_eq!(ctx.phase, Phase::Rotating);
    // 128 frames over two lanes with 20-step episodes.
    assert_eq!(ctx.episodes.total_episodes(), 6);
    assert!(ctx.episodes.mean_reward().unwrap().is_finite());

    let reporter = trainer.reporter();
    assert_eq!(reporter.cycles.len(), 3);
    assert!(reporter
        .cycles
        .iter()
        .all(|m| m.value_loss.is_finite() && m.policy_loss.is_finite() && m.action_std > 0.0));
    // Updates 1, 2 and 3 fall inside the test window.
    assert_eq!(reporter.tests.len(), 3);

    let checkpoints = &trainer.checkpoints().checkpoints;
    assert_eq!(checkpoints.len(), 3);
    assert!(checkpoints[0].best);
    assert_eq!(checkpoints[0].parameters.len(), trainer.policy().num_parameters());
    assert!(checkpoints[0].observation_stats.is_some());

    let best = checkpoints.iter().map(|c| c.score).fold(f32::MIN, f32::max);
    assert_eq!(ctx.best_score, Some(best));
    assert!(trainer.policy().log_std() < config.std_start);
}

#[tokio::test]
async fn test_runs_are_reproducible_for_a_seed() {
    let config = small_config(2);
    let mut first = build(&config, MemoryReporter::default(), MemoryCheckpointer::default());
    let mut second = build(&config, MemoryReporter::default(), MemoryCheckpointer::default());
    first.run().await.unwrap();
    second.run().await.unwrap();

    assert_eq!(first.policy().parameters(), second.policy().parameters());
    assert_eq!(first.reporter().tests, second.reporter().tests);
}

#[tokio::test]
async fn test_json_checkpoints_land_on_disk() {
    let dir = std::env::temp_dir().join(format!("vecppo-train-{}", std::process::id()));
    let config = small_config(2);
    let mut trainer = build(&config, MemoryReporter::default(), JsonCheckpointer::new(&dir));
    trainer.run().await.unwrap();

    let written = trainer.checkpoints().written();
    // One test at update 1: a `dict_` file plus its `BEST_` twin.
    assert_eq!(written.len(), 2);
    assert_eq!(trainer.checkpoints().saved(), 1);
    for path in written {
        assert!(path.exists());
    }
    tokio::fs::remove_dir_all(&dir).await.unwrap();
}
